//! Persistence Tests
//!
//! Config and decision log files under a service directory.

use crate::common::*;
use shardtxn::{
    DecisionLog, Outcome, RecoveryToken, SessionId, TransactionAction, TransactionService,
    WriteConcern, CONFIG_FILE_NAME, DECISION_LOG_FILE_NAME,
};
use tempfile::TempDir;

async fn commit_two_phase(service: &TransactionService, session: SessionId) {
    let router = service.router(session);
    let mut router = router.lock().await;
    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router
        .run_statement(&[p("a"), p("b")], put("x", 1))
        .await
        .unwrap();
    assert!(router.commit(&WriteConcern::majority(), None).await.is_ok());
}

#[tokio::test]
async fn first_open_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let _service = TransactionService::open(KvCluster::new(), dir.path()).unwrap();

    let config = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
    assert!(config.contains("prepare_timeout_ms = 30000"));
    assert!(config.contains("durability = \"always\""));
}

#[tokio::test]
async fn decisions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let cluster = KvCluster::new();
    let session = SessionId::new();

    {
        let service = TransactionService::open(cluster.clone(), dir.path()).unwrap();
        commit_two_phase(&service, session).await;
    }
    assert!(dir.path().join(DECISION_LOG_FILE_NAME).exists());

    let service = TransactionService::open(cluster.clone(), dir.path()).unwrap();
    let decisions = service.coordinator().decisions();
    assert_eq!(decisions.len(), 1);

    // A new router finishes the commit from the persisted decision
    let router = service.router(session);
    let mut router = router.lock().await;
    router.begin_or_continue(1, TransactionAction::Commit).unwrap();
    let token = RecoveryToken::for_partition(p("a"));
    let reply = router.commit(&WriteConcern::majority(), Some(&token)).await;
    assert!(reply.is_ok());

    let txn = router.txn().unwrap();
    assert_eq!(decisions.get(&txn).unwrap().outcome, Outcome::Committed);
}

#[tokio::test]
async fn relative_log_path_resolves_against_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "decision_log_path = \"logs/txn.log\"\ndurability = \"cache\"\n",
    )
    .unwrap();

    let service = TransactionService::open(KvCluster::new(), dir.path()).unwrap();
    commit_two_phase(&service, SessionId::new()).await;

    assert!(dir.path().join("logs").join("txn.log").exists());
    assert!(!dir.path().join(DECISION_LOG_FILE_NAME).exists());
}

#[test]
fn malformed_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "prepare_timeout_ms = \"soon\"\n").unwrap();
    assert!(TransactionService::open(KvCluster::new(), dir.path()).is_err());
}
