//! Session Tests
//!
//! Many sessions sharing one service, txnNumber ordering, server status.

use crate::common::*;
use serde_json::json;
use shardtxn::{ErrorCode, SessionId, TransactionAction, TransactionService, WriteConcern};
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_commit_independently() {
    let cluster = KvCluster::new();
    let service = Arc::new(TransactionService::cache(cluster.clone()));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let router = service.router(SessionId::new());
                let mut router = router.lock().await;
                router.begin_or_continue(1, TransactionAction::Start).unwrap();
                let key = format!("k{}", i);
                let targets = [p(&format!("p{}", i % 3)), p(&format!("p{}", (i + 1) % 3))];
                router
                    .run_statement(&targets, json!({ "put": key, "value": i }))
                    .await
                    .unwrap();
                router.commit(&WriteConcern::majority(), None).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    for i in 0..16 {
        let key = format!("k{}", i);
        assert_eq!(cluster.value(&format!("p{}", i % 3), &key), Some(json!(i)));
        assert_eq!(
            cluster.value(&format!("p{}", (i + 1) % 3), &key),
            Some(json!(i))
        );
    }

    let status = service.server_status();
    let txns = &status["transactions"];
    assert_eq!(txns["currentOpen"], 0);
    assert_eq!(txns["totalStarted"], 16);
    assert_eq!(txns["totalCommitted"], 16);
    assert_eq!(txns["commitTypes"]["twoPhaseCommit"]["initiated"], 16);
    assert_eq!(txns["commitTypes"]["twoPhaseCommit"]["successful"], 16);
    assert_eq!(service.session_count(), 16);
}

#[tokio::test]
async fn newer_txn_number_replaces_the_open_transaction() {
    let cluster = KvCluster::new();
    let service = TransactionService::cache(cluster.clone());
    let router = service.router(SessionId::new());
    let mut router = router.lock().await;

    router.begin_or_continue(1, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], put("x", 1)).await.unwrap();

    router.begin_or_continue(2, TransactionAction::Start).unwrap();
    router.run_statement(&[p("a")], put("x", 2)).await.unwrap();
    assert!(router.commit(&WriteConcern::majority(), None).await.is_ok());
    assert_eq!(cluster.value("a", "x"), Some(json!(2)));

    let err = router
        .begin_or_continue(1, TransactionAction::Continue)
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::TransactionTooOld);

    let snap = service.metrics_snapshot();
    assert_eq!(snap.total_started, 2);
    assert_eq!(snap.total_committed, 1);
    assert_eq!(snap.total_aborted, 0);
    assert_eq!(snap.current_open, 0);
}

#[tokio::test]
async fn retried_commit_on_same_txn_number_is_answered_from_cache() {
    let cluster = KvCluster::new();
    let service = TransactionService::cache(cluster.clone());
    let session = SessionId::new();

    {
        let router = service.router(session);
        let mut router = router.lock().await;
        router.begin_or_continue(4, TransactionAction::Start).unwrap();
        router
            .run_statement(&[p("a"), p("b")], put("x", 1))
            .await
            .unwrap();
        assert!(router.commit(&WriteConcern::majority(), None).await.is_ok());
    }

    let router = service.router(session);
    let mut router = router.lock().await;
    router.begin_or_continue(4, TransactionAction::Commit).unwrap();
    assert!(router.commit(&WriteConcern::majority(), None).await.is_ok());

    let snap = service.metrics_snapshot();
    assert_eq!(snap.total_started, 1);
    assert_eq!(snap.total_initiated(), 1);
}

#[test]
fn metrics_snapshot_serializes_in_camel_case() {
    let service = TransactionService::cache(KvCluster::new());
    let value = serde_json::to_value(service.metrics_snapshot()).unwrap();
    assert!(value.get("totalContactedParticipants").is_some());
    assert!(value.get("totalRequestsTargeted").is_some());
}
