//! Integration Tests
//!
//! End-to-end tests through the public facade against a transactional
//! key-value cluster:
//! - Atomicity: every commit protocol, refused prepares, aborts
//! - Sessions: concurrent sessions, txnNumber handling, server status
//! - Persistence: decision log and config files on disk

#[path = "../common/mod.rs"]
mod common;

mod atomicity;
mod persistence;
mod sessions;
