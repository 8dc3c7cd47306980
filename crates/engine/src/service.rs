//! Session catalog
//!
//! [`TransactionService`] is the process-wide entry point: it owns the
//! partition client, the decision log, the commit coordinator and the router
//! metrics, and hands out one [`TransactionRouter`] per session.
//!
//! | Constructor | Decision log | Config |
//! |-------------|--------------|--------|
//! | `open(dir)` | `dir/decisions.log` unless configured | `dir/shardtxn.toml` |
//! | `open_with_config(cfg)` | `cfg.decision_log_path` or in memory | as given |
//! | `cache()` | in memory | defaults |

use crate::config::{CoordinatorConfig, CONFIG_FILE_NAME};
use crate::coordinator::CommitCoordinator;
use crate::metrics::{MetricsSnapshot, RouterMetrics};
use crate::router::TransactionRouter;
use crate::transport::PartitionClient;
use dashmap::DashMap;
use shardtxn_core::{Result, SessionId};
use shardtxn_durability::{DecisionLog, FileDecisionLog, InMemoryDecisionLog};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Decision log file name used by [`TransactionService::open`]
pub const DECISION_LOG_FILE_NAME: &str = "decisions.log";

/// Shared handle to one session's router
pub type SessionRouter = Arc<Mutex<TransactionRouter>>;

/// Routers for every session plus the state they share
pub struct TransactionService {
    sessions: DashMap<SessionId, SessionRouter>,
    coordinator: CommitCoordinator,
    metrics: Arc<RouterMetrics>,
}

impl TransactionService {
    /// Open a service whose state lives in `dir`
    ///
    /// Creates `dir/shardtxn.toml` with defaults on first start. A relative
    /// `decision_log_path` is resolved against `dir`.
    pub fn open<P: AsRef<Path>>(client: Arc<dyn PartitionClient>, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        CoordinatorConfig::write_default_if_missing(&config_path)?;
        let mut config = CoordinatorConfig::from_file(&config_path)?;

        config.decision_log_path = Some(match config.decision_log_path.take() {
            Some(path) if path.is_relative() => dir.join(path),
            Some(path) => path,
            None => dir.join(DECISION_LOG_FILE_NAME),
        });

        Self::open_with_config(client, config)
    }

    /// Open a service with an explicit configuration
    ///
    /// Without `decision_log_path` decisions are kept in memory.
    pub fn open_with_config(
        client: Arc<dyn PartitionClient>,
        config: CoordinatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mode = config.durability_mode()?;

        let decisions: Arc<dyn DecisionLog> = match &config.decision_log_path {
            Some(path) => {
                let log = FileDecisionLog::open(path, mode)?;
                info!(
                    target: "shardtxn::commit",
                    path = %path.display(),
                    mode = ?mode,
                    decisions = log.len(),
                    "Opened decision log"
                );
                Arc::new(log)
            }
            None => {
                info!(target: "shardtxn::commit", "Keeping commit decisions in memory");
                Arc::new(InMemoryDecisionLog::new())
            }
        };

        Ok(Self::with_parts(client, decisions, config))
    }

    /// In-memory service with default configuration
    pub fn cache(client: Arc<dyn PartitionClient>) -> Self {
        Self::with_parts(
            client,
            Arc::new(InMemoryDecisionLog::new()),
            CoordinatorConfig::default(),
        )
    }

    /// Assemble a service from already-built parts
    ///
    /// Several services sharing one `decisions` log behave like several
    /// routers in front of the same cluster.
    pub fn with_parts(
        client: Arc<dyn PartitionClient>,
        decisions: Arc<dyn DecisionLog>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            coordinator: CommitCoordinator::new(client, decisions, Arc::new(config)),
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    /// Router for `session`, created on first use
    pub fn router(&self, session: SessionId) -> SessionRouter {
        self.sessions
            .entry(session)
            .or_insert_with(|| {
                debug!(target: "shardtxn::txn", session = %session, "New session");
                Arc::new(Mutex::new(TransactionRouter::new(
                    session,
                    self.coordinator.clone(),
                    Arc::clone(&self.metrics),
                )))
            })
            .clone()
    }

    /// Drop a session's router
    ///
    /// Returns whether the session existed.
    pub fn end_session(&self, session: &SessionId) -> bool {
        self.sessions.remove(session).is_some()
    }

    /// Number of sessions with a router
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Shared commit coordinator
    pub fn coordinator(&self) -> &CommitCoordinator {
        &self.coordinator
    }

    /// Shared router metrics
    pub fn metrics(&self) -> &Arc<RouterMetrics> {
        &self.metrics
    }

    /// Current metric values
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// `{"transactions": {...}}` server status section
    pub fn server_status(&self) -> serde_json::Value {
        self.metrics.server_status()
    }
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("sessions", &self.sessions.len())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
