//! Decision log implementations
//!
//! The two-phase coordinator persists its decision here before releasing any
//! `commitTransaction` or `abortTransaction`. A decision is write-once: an
//! identical repeat is a no-op, a contradicting one is rejected.

use crate::decision::CommitDecision;
use crate::mode::DurabilityMode;
use crate::record::{decode_record, encode_record, RecordError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use shardtxn_core::{Error, Result, TxnId};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What a persist call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The decision was new and is now durable
    Written,
    /// An agreeing decision was already persisted
    AlreadyPersisted,
}

/// Durable store of two-phase commit decisions
pub trait DecisionLog: Send + Sync {
    /// Persist a decision
    ///
    /// # Errors
    ///
    /// `Error::DecisionConflict` if a different decision is already stored
    /// for the transaction; I/O errors from the backing store.
    fn persist(&self, decision: &CommitDecision) -> Result<PersistOutcome>;

    /// Look up the decision for a transaction
    fn get(&self, txn: &TxnId) -> Option<CommitDecision>;

    /// Number of stored decisions
    fn len(&self) -> usize;

    /// Whether no decision is stored
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_existing(existing: &CommitDecision, incoming: &CommitDecision) -> Result<PersistOutcome> {
    if existing.agrees_with(incoming) {
        Ok(PersistOutcome::AlreadyPersisted)
    } else {
        Err(Error::DecisionConflict { txn: incoming.txn })
    }
}

/// Decision log held in memory
#[derive(Debug, Default)]
pub struct InMemoryDecisionLog {
    decisions: DashMap<TxnId, CommitDecision>,
}

impl InMemoryDecisionLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

impl DecisionLog for InMemoryDecisionLog {
    fn persist(&self, decision: &CommitDecision) -> Result<PersistOutcome> {
        match self.decisions.entry(decision.txn) {
            Entry::Occupied(existing) => check_existing(existing.get(), decision),
            Entry::Vacant(slot) => {
                slot.insert(decision.clone());
                Ok(PersistOutcome::Written)
            }
        }
    }

    fn get(&self, txn: &TxnId) -> Option<CommitDecision> {
        self.decisions.get(txn).map(|d| d.clone())
    }

    fn len(&self) -> usize {
        self.decisions.len()
    }
}

struct FileLogInner {
    file: File,
    index: HashMap<TxnId, CommitDecision>,
    write_position: u64,
}

impl FileLogInner {
    /// Append one encoded record, rewinding to the last intact record on failure
    fn append(&mut self, bytes: &[u8], sync: bool) -> std::io::Result<()> {
        let written = self.file.write_all(bytes).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            self.rewind();
            return Err(e);
        }
        self.write_position += bytes.len() as u64;
        Ok(())
    }

    /// Drop any bytes past `write_position` so later appends stay readable
    fn rewind(&mut self) {
        let position = self.write_position;
        let restored = self
            .file
            .set_len(position)
            .and_then(|()| self.file.seek(SeekFrom::Start(position)).map(|_| ()));
        if let Err(e) = restored {
            warn!(
                target: "shardtxn::commit",
                position,
                error = %e,
                "Failed to rewind decision log after a failed append"
            );
        }
    }
}

/// Append-only decision log file
///
/// Opening replays every intact record into an in-memory index. A torn or
/// corrupt tail (crash mid-append) is truncated away; records before it are
/// kept.
pub struct FileDecisionLog {
    inner: Mutex<FileLogInner>,
    path: PathBuf,
    mode: DurabilityMode,
}

impl FileDecisionLog {
    /// Open (creating if needed) the log at `path`
    pub fn open(path: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;

        let mut index = HashMap::new();
        let mut offset = 0usize;
        while offset < buffer.len() {
            match decode_record(&buffer[offset..]) {
                Ok((decision, consumed)) => {
                    index.insert(decision.txn, decision);
                    offset += consumed;
                }
                Err(RecordError::InsufficientData) => {
                    warn!(
                        target: "shardtxn::commit",
                        path = %path.display(),
                        offset,
                        "Truncating partial decision record"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        target: "shardtxn::commit",
                        path = %path.display(),
                        offset,
                        error = %e,
                        "Truncating corrupt decision log tail"
                    );
                    break;
                }
            }
        }

        let write_position = offset as u64;
        if write_position < buffer.len() as u64 {
            file.set_len(write_position)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(write_position))?;

        debug!(
            target: "shardtxn::commit",
            path = %path.display(),
            decisions = index.len(),
            "Opened decision log"
        );

        Ok(Self {
            inner: Mutex::new(FileLogInner {
                file,
                index,
                write_position,
            }),
            path,
            mode,
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durability mode the log was opened with
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Current size of the log in bytes
    pub fn size(&self) -> u64 {
        self.inner.lock().write_position
    }
}

impl DecisionLog for FileDecisionLog {
    fn persist(&self, decision: &CommitDecision) -> Result<PersistOutcome> {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.index.get(&decision.txn) {
            return check_existing(existing, decision);
        }

        let bytes = encode_record(decision)?;
        inner.append(&bytes, self.mode.requires_immediate_fsync())?;
        inner.index.insert(decision.txn, decision.clone());
        Ok(PersistOutcome::Written)
    }

    fn get(&self, txn: &TxnId) -> Option<CommitDecision> {
        self.inner.lock().index.get(txn).cloned()
    }

    fn len(&self) -> usize {
        self.inner.lock().index.len()
    }
}

impl std::fmt::Debug for FileDecisionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDecisionLog")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}
