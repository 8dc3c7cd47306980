//! Atomicity Tests
//!
//! Writes become visible on every partition or on none.

use crate::common::*;
use serde_json::json;
use shardtxn::{
    CommitType, DecisionLog, ErrorCode, ErrorLabel, SessionId, TransactionAction,
    TransactionService, WriteConcern,
};

fn cache(cluster: &std::sync::Arc<KvCluster>) -> TransactionService {
    TransactionService::cache(cluster.clone())
}

// ============================================================================
// Commit protocols
// ============================================================================

#[tokio::test]
async fn two_phase_commit_applies_every_write() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], put("x", 1)).await.unwrap();
    router.run_statement(&[p("b")], put("y", 2)).await.unwrap();
    router.run_statement(&[p("c")], put("z", 3)).await.unwrap();

    // Nothing is visible before commit
    assert_eq!(cluster.value("a", "x"), None);

    let reply = router.commit(&WriteConcern::majority(), None).await;
    assert!(reply.is_ok());
    assert_eq!(router.commit_type(), Some(CommitType::TwoPhaseCommit));
    assert_eq!(cluster.value("a", "x"), Some(json!(1)));
    assert_eq!(cluster.value("b", "y"), Some(json!(2)));
    assert_eq!(cluster.value("c", "z"), Some(json!(3)));
    assert_eq!(service.coordinator().decisions().len(), 1);
}

#[tokio::test]
async fn refused_prepare_applies_nothing() {
    let cluster = KvCluster::new();
    cluster.refuse_prepare("b");
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router
        .run_statement(&[p("a"), p("b")], put("x", 1))
        .await
        .unwrap();

    let reply = router.commit(&WriteConcern::majority(), None).await;
    assert_eq!(reply.code(), Some(ErrorCode::NoSuchTransaction));
    assert!(reply.has_label(ErrorLabel::TransientTransactionError));
    assert_eq!(cluster.value("a", "x"), None);
    assert_eq!(cluster.value("b", "x"), None);
    assert_eq!(cluster.open_transactions("a"), 0);
    assert_eq!(cluster.open_transactions("b"), 0);
}

#[tokio::test]
async fn single_write_shard_commit() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], get("x")).await.unwrap();
    router.run_statement(&[p("b")], put("y", 7)).await.unwrap();

    let reply = router.commit(&WriteConcern::majority(), None).await;
    assert!(reply.is_ok());
    assert_eq!(router.commit_type(), Some(CommitType::SingleWriteShard));
    assert_eq!(cluster.value("b", "y"), Some(json!(7)));
    assert_eq!(cluster.open_transactions("a"), 0);
}

#[tokio::test]
async fn read_only_commit_releases_every_participant() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router
        .run_statement(&[p("a"), p("b"), p("c")], get("x"))
        .await
        .unwrap();
    assert!(router.recovery_token().is_empty());

    let reply = router.commit(&WriteConcern::majority(), None).await;
    assert!(reply.is_ok());
    assert_eq!(router.commit_type(), Some(CommitType::ReadOnly));
    for partition in ["a", "b", "c"] {
        assert_eq!(cluster.open_transactions(partition), 0);
    }
}

#[tokio::test]
async fn statements_see_their_own_writes() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], put("x", 5)).await.unwrap();
    let outcome = router.run_statement(&[p("a")], get("x")).await.unwrap();
    assert_eq!(outcome.replies[0].1.result["value"], json!(5));
    assert_eq!(outcome.recovery_token.recovery_partition, Some(p("a")));
}

// ============================================================================
// Aborts
// ============================================================================

#[tokio::test]
async fn explicit_abort_discards_writes() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router
        .run_statement(&[p("a"), p("b")], put("x", 1))
        .await
        .unwrap();
    assert!(router.abort(&WriteConcern::majority()).await.is_ok());

    assert_eq!(cluster.value("a", "x"), None);
    assert_eq!(cluster.open_transactions("a"), 0);
    assert_eq!(cluster.open_transactions("b"), 0);

    let reply = router.commit(&WriteConcern::majority(), None).await;
    assert_eq!(reply.code(), Some(ErrorCode::NoSuchTransaction));
}

#[tokio::test]
async fn failed_statement_aborts_everywhere() {
    let cluster = KvCluster::new();
    let service = cache(&cluster);
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], put("x", 1)).await.unwrap();
    let err = router
        .run_statement(&[p("b")], json!({ "drop": "everything" }))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidOptions);

    assert_eq!(cluster.open_transactions("a"), 0);
    assert_eq!(cluster.open_transactions("b"), 0);
    assert_eq!(
        service.metrics_snapshot().abort_cause.get("InvalidOptions"),
        Some(&1)
    );
}
