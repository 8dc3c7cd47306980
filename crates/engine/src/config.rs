//! Coordinator configuration via `shardtxn.toml`
//!
//! On first start a default `shardtxn.toml` is created. To change settings,
//! edit the file and restart.

use serde::{Deserialize, Serialize};
use shardtxn_core::{Error, Result, WriteConcernPolicy};
use shardtxn_durability::DurabilityMode;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name.
pub const CONFIG_FILE_NAME: &str = "shardtxn.toml";

/// Coordinator configuration loaded from `shardtxn.toml`.
///
/// # Example
///
/// ```toml
/// prepare_timeout_ms = 30000
/// return_after_decision = false
/// durability = "always"
/// decision_log_path = "/var/lib/shardtxn/decisions.log"
///
/// [write_concern]
/// known_tags = ["multiRegion"]
/// max_nodes = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deadline for the whole prepare phase of a two-phase commit.
    #[serde(default = "default_prepare_timeout_ms")]
    pub prepare_timeout_ms: u64,
    /// Acknowledge a two-phase commit once the decision is durable and
    /// propagate `commitTransaction` in the background.
    #[serde(default)]
    pub return_after_decision: bool,
    /// Attempts per participant when propagating a commit decision.
    #[serde(default = "default_commit_retry_attempts")]
    pub commit_retry_attempts: u32,
    /// How many times one statement may be retargeted after view resolution.
    #[serde(default = "default_max_view_retries")]
    pub max_view_retries: u32,
    /// Transactions slower than this are logged at info level.
    #[serde(default = "default_slow_transaction_ms")]
    pub slow_transaction_ms: u64,
    /// Decision log durability: `"always"` or `"cache"`.
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Decision log file. Without it decisions are kept in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_log_path: Option<PathBuf>,
    /// Deployment facts for write concern validation.
    #[serde(default)]
    pub write_concern: WriteConcernPolicy,
}

fn default_prepare_timeout_ms() -> u64 {
    30_000
}

fn default_commit_retry_attempts() -> u32 {
    3
}

fn default_max_view_retries() -> u32 {
    3
}

fn default_slow_transaction_ms() -> u64 {
    100
}

fn default_durability_str() -> String {
    "always".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: default_prepare_timeout_ms(),
            return_after_decision: false,
            commit_retry_attempts: default_commit_retry_attempts(),
            max_view_retries: default_max_view_retries(),
            slow_transaction_ms: default_slow_transaction_ms(),
            durability: default_durability_str(),
            decision_log_path: None,
            write_concern: WriteConcernPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Parse the durability string into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"always"` or `"cache"`.
    pub fn durability_mode(&self) -> Result<DurabilityMode> {
        match self.durability.as_str() {
            "always" => Ok(DurabilityMode::Always),
            "cache" => Ok(DurabilityMode::Cache),
            other => Err(Error::Config(format!(
                "Invalid durability mode '{}' in shardtxn.toml. Expected \"always\" or \"cache\".",
                other
            ))),
        }
    }

    /// Check every value, not just the ones that parse.
    pub fn validate(&self) -> Result<()> {
        self.durability_mode()?;
        if self.prepare_timeout_ms == 0 {
            return Err(Error::Config(
                "prepare_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.commit_retry_attempts == 0 {
            return Err(Error::Config(
                "commit_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Prepare phase deadline as a `Duration`.
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    /// Slow transaction threshold as a `Duration`.
    pub fn slow_transaction_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_transaction_ms)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# shardtxn coordinator configuration
#
# Deadline for collecting prepare votes in two-phase commit (milliseconds)
prepare_timeout_ms = 30000

# Acknowledge two-phase commits as soon as the decision is durable and send
# commitTransaction to participants in the background (default: false)
return_after_decision = false

# Attempts per participant when delivering a commit decision
commit_retry_attempts = 3

# Retargets allowed per statement after a view-resolution error
max_view_retries = 3

# Log transactions that take longer than this (milliseconds)
slow_transaction_ms = 100

# Decision log durability: "always" (default) or "cache"
#   "always" = fsync every decision before any participant learns it
#   "cache"  = no fsync; without decision_log_path decisions stay in memory
durability = "always"

# decision_log_path = "decisions.log"

[write_concern]
# Custom write concern modes defined by the deployment
known_tags = []
# Data-bearing nodes per partition
max_nodes = 3
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: CoordinatorConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
