//! Write concern
//!
//! A write concern states how durable a commit must be before it is
//! acknowledged. Validity depends on the deployment, so validation takes a
//! [`WriteConcernPolicy`] describing the nodes and tag sets that exist.

use crate::error::ErrorCode;
use crate::response::WriteConcernError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The `w` field of a write concern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    /// Acknowledge after this many nodes applied the write
    Nodes(u32),
    /// Acknowledge after a majority of voting nodes applied the write
    Majority,
    /// Acknowledge according to a named custom mode
    Tag(String),
}

/// Client durability requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConcern {
    /// Acknowledgement mode
    pub w: WriteMode,
    /// Require the write to be journaled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub j: Option<bool>,
    /// Give up waiting for durability after this many milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wtimeout_ms: Option<u64>,
}

impl WriteConcern {
    /// `{w: 1}`, the default used for internal aborts
    pub fn local() -> Self {
        Self {
            w: WriteMode::Nodes(1),
            j: None,
            wtimeout_ms: None,
        }
    }

    /// `{w: "majority"}`
    pub fn majority() -> Self {
        Self {
            w: WriteMode::Majority,
            j: None,
            wtimeout_ms: None,
        }
    }

    /// `{w: <tag>}`
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            w: WriteMode::Tag(tag.into()),
            j: None,
            wtimeout_ms: None,
        }
    }

    /// `{w: n}`
    pub fn nodes(n: u32) -> Self {
        Self {
            w: WriteMode::Nodes(n),
            j: None,
            wtimeout_ms: None,
        }
    }

    /// Set the wtimeout
    pub fn with_timeout_ms(mut self, wtimeout_ms: u64) -> Self {
        self.wtimeout_ms = Some(wtimeout_ms);
        self
    }

    /// Set the journal flag
    pub fn with_journal(mut self, j: bool) -> Self {
        self.j = Some(j);
        self
    }

    /// Check this write concern against a deployment policy
    ///
    /// # Errors
    ///
    /// - `UnknownReplWriteConcern` for a tag the policy does not define
    /// - `UnsatisfiableWriteConcern` for more nodes than the policy has
    /// - `InvalidOptions` for `{w: 0, j: true}`
    pub fn validate(&self, policy: &WriteConcernPolicy) -> Result<(), WriteConcernError> {
        match &self.w {
            WriteMode::Majority => {}
            WriteMode::Tag(tag) => {
                if !policy.known_tags.contains(tag) {
                    return Err(WriteConcernError::new(
                        ErrorCode::UnknownReplWriteConcern,
                        format!("Unrecognized write concern mode: {}", tag),
                    ));
                }
            }
            WriteMode::Nodes(n) => {
                if *n > policy.max_nodes {
                    return Err(WriteConcernError::new(
                        ErrorCode::UnsatisfiableWriteConcern,
                        format!(
                            "Not enough data-bearing nodes: requested {}, have {}",
                            n, policy.max_nodes
                        ),
                    ));
                }
                if *n == 0 && self.j == Some(true) {
                    return Err(WriteConcernError::new(
                        ErrorCode::InvalidOptions,
                        "Cannot request journaling with w: 0",
                    ));
                }
            }
        }
        Ok(())
    }
}

impl Default for WriteConcern {
    fn default() -> Self {
        Self::majority()
    }
}

/// Deployment facts that decide whether a write concern can be satisfied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConcernPolicy {
    /// Custom write concern modes defined by the deployment
    #[serde(default)]
    pub known_tags: BTreeSet<String>,
    /// Number of data-bearing nodes per partition
    #[serde(default = "default_max_nodes")]
    pub max_nodes: u32,
}

fn default_max_nodes() -> u32 {
    3
}

impl Default for WriteConcernPolicy {
    fn default() -> Self {
        Self {
            known_tags: BTreeSet::new(),
            max_nodes: default_max_nodes(),
        }
    }
}

impl WriteConcernPolicy {
    /// Policy with additional custom modes
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tags.extend(tags.into_iter().map(Into::into));
        self
    }
}
