//! Durability mode configuration
//!
//! Controls whether commit decisions reach disk and when they are fsynced.

use serde::{Deserialize, Serialize};

/// Durability mode for the decision log
///
/// # Modes
///
/// | Mode | fsync | Decisions lost on crash |
/// |------|-------|-------------------------|
/// | Cache | Never | All not yet flushed by the OS |
/// | Always | Every decision | None |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Decisions are written without fsync, or kept purely in memory when no
    /// log path is configured
    ///
    /// Use case: tests, single-process deployments where a coordinator crash
    /// takes the participants down with it.
    Cache,

    /// fsync after every decision (the default)
    ///
    /// A two-phase commit does not release any `commitTransaction` until its
    /// decision record is on stable storage.
    #[default]
    Always,
}

impl DurabilityMode {
    /// Check if this mode requires immediate fsync on every decision
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (fastest, decisions may be lost on crash)",
            DurabilityMode::Always => "Always sync (safest, slowest)",
        }
    }
}
