//! Hash Chain Store
//!
//! The append-only, hash-linked audit log described in spec §3/§4.1. Every
//! consequential action in the runtime is recorded here *before* it
//! happens (see [`crate::hardening::precede`]). Persisted as one
//! canonicalized JSON object per line under `state/chain.log`, mirroring
//! the newline-delimited, self-verifying-per-line format from spec §6.
//!
//! Structurally this follows the same "spawn_blocking wraps a plain
//! `std::fs`/`Connection` handle, async callers await the blocking task"
//! idiom the teacher uses for its SQLite task queue.

mod canonical;

pub use canonical::canonical_json_bytes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task;

use crate::error::{AgencyError, AgencyResult};

pub const GENESIS_HASH: &str = "genesis";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainEntry {
    pub seq: u64,
    pub prev_hash: String,
    pub payload: Value,
    pub payload_hash: String,
    pub entry_hash: String,
    pub ts: DateTime<Utc>,
}

impl ChainEntry {
    fn compute_entry_hash(prev_hash: &str, payload_hash: &str, ts: &DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(payload_hash.as_bytes());
        hasher.update(ts.to_rfc3339().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Recompute this entry's hash from its own fields and check it against
    /// the stored `entry_hash`, given the previous entry's hash.
    pub fn verify_link(&self, prev_hash: &str) -> bool {
        if self.prev_hash != prev_hash {
            return false;
        }
        let expected_payload_hash = hex::encode(Sha256::digest(canonical_json_bytes(&self.payload)));
        if expected_payload_hash != self.payload_hash {
            return false;
        }
        let expected_entry_hash = Self::compute_entry_hash(prev_hash, &self.payload_hash, &self.ts);
        expected_entry_hash == self.entry_hash
    }
}

#[derive(Debug, Clone)]
pub struct VerifyFailure {
    pub fail_at: u64,
}

/// Append-only, hash-linked log. Appends are serialized under a single
/// async mutex; reads observe a consistent, already-committed prefix via
/// the in-memory index.
pub struct ChainStore {
    path: PathBuf,
    writer: Mutex<Vec<ChainEntry>>,
}

impl ChainStore {
    /// Open (or create) the chain log at `path`, recovering the in-memory
    /// index by re-reading the tail, per spec §4.1's crash-recovery
    /// contract.
    pub async fn open(path: impl Into<PathBuf>) -> AgencyResult<Arc<Self>> {
        let path = path.into();
        let entries = Self::load_existing(&path).await?;
        Ok(Arc::new(Self {
            path,
            writer: Mutex::new(entries),
        }))
    }

    async fn load_existing(path: &Path) -> AgencyResult<Vec<ChainEntry>> {
        if !path.exists() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| AgencyError::fatal(format!("failed to create chain dir: {e}")))?;
            }
            return Ok(Vec::new());
        }

        let path = path.to_path_buf();
        task::spawn_blocking(move || -> AgencyResult<Vec<ChainEntry>> {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| AgencyError::fatal(format!("failed to read chain log: {e}")))?;
            let mut entries = Vec::new();
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: ChainEntry = serde_json::from_str(line)
                    .map_err(|e| AgencyError::fatal(format!("corrupt chain log line: {e}")))?;
                entries.push(entry);
            }
            Ok(entries)
        })
        .await
        .map_err(|e| AgencyError::fatal(format!("chain recovery task panicked: {e}")))?
    }

    /// Append a new entry. Serializes the payload canonically, computes the
    /// hash chain link, persists it, and returns the new `seq`.
    pub async fn append(&self, payload: Value) -> AgencyResult<u64> {
        let mut guard = self.writer.lock().await;

        let seq = guard.len() as u64;
        let prev_hash = guard
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let payload_hash = hex::encode(Sha256::digest(canonical_json_bytes(&payload)));
        let ts = Utc::now();
        let entry_hash = ChainEntry::compute_entry_hash(&prev_hash, &payload_hash, &ts);

        let entry = ChainEntry {
            seq,
            prev_hash,
            payload,
            payload_hash,
            entry_hash,
            ts,
        };

        self.persist(&entry).await?;
        guard.push(entry);
        Ok(seq)
    }

    async fn persist(&self, entry: &ChainEntry) -> AgencyResult<()> {
        let path = self.path.clone();
        let line = serde_json::to_string(entry)
            .map_err(|e| AgencyError::fatal(format!("failed to serialize chain entry: {e}")))?;

        task::spawn_blocking(move || -> AgencyResult<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| AgencyError::fatal(format!("failed to open chain log: {e}")))?;
            writeln!(file, "{line}")
                .map_err(|e| AgencyError::fatal(format!("failed to append chain log: {e}")))?;
            file.sync_data()
                .map_err(|e| AgencyError::fatal(format!("failed to fsync chain log: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| AgencyError::fatal(format!("chain persist task panicked: {e}")))?
    }

    /// Walk the chain from `seq=0`, recomputing hashes, and report the
    /// first broken link if any.
    pub async fn verify(&self) -> Result<(), VerifyFailure> {
        let guard = self.writer.lock().await;
        let mut prev_hash = GENESIS_HASH.to_string();
        for entry in guard.iter() {
            if !entry.verify_link(&prev_hash) {
                return Err(VerifyFailure { fail_at: entry.seq });
            }
            prev_hash = entry.entry_hash.clone();
        }
        Ok(())
    }

    /// A lazy, restartable snapshot of entries from `from_seq` onward, used
    /// for replication by the sync engine.
    pub async fn stream(&self, from_seq: u64) -> ChainEntryStream {
        let guard = self.writer.lock().await;
        let entries: Vec<ChainEntry> = guard
            .iter()
            .filter(|e| e.seq >= from_seq)
            .cloned()
            .collect();
        ChainEntryStream { entries, pos: 0 }
    }

    pub async fn len(&self) -> u64 {
        self.writer.lock().await.len() as u64
    }

    pub async fn tail_hash(&self) -> String {
        self.writer
            .lock()
            .await
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }
}

/// Restartable, finite lazy sequence of chain entries from a reconnect
/// point, per spec §9's "generators / streams" design note.
pub struct ChainEntryStream {
    entries: Vec<ChainEntry>,
    pos: usize,
}

impl Iterator for ChainEntryStream {
    type Item = ChainEntry;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.entries.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_links_entries_and_verifies() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.log")).await.unwrap();

        let s0 = store.append(json!({"kind": "startup"})).await.unwrap();
        let s1 = store.append(json!({"kind": "api_request", "op": "chat"})).await.unwrap();
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);

        assert!(store.verify().await.is_ok());
    }

    #[tokio::test]
    async fn tamper_is_detected_at_the_right_seq() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.log")).await.unwrap();

        for i in 0..5 {
            store.append(json!({"i": i})).await.unwrap();
        }

        {
            let mut guard = store.writer.lock().await;
            guard[2].payload = json!({"i": "tampered"});
        }

        let failure = store.verify().await.unwrap_err();
        assert_eq!(failure.fail_at, 2);
    }

    #[tokio::test]
    async fn recovers_tail_from_disk_on_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chain.log");
        {
            let store = ChainStore::open(&path).await.unwrap();
            store.append(json!({"a": 1})).await.unwrap();
            store.append(json!({"a": 2})).await.unwrap();
        }

        let reopened = ChainStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 2);
        assert!(reopened.verify().await.is_ok());
    }

    #[tokio::test]
    async fn stream_from_seq_is_lazy_and_restartable() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
        for i in 0..4 {
            store.append(json!({"i": i})).await.unwrap();
        }

        let collected: Vec<_> = store.stream(2).await.collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].seq, 2);

        // Restarting from the same point yields the same sequence.
        let collected_again: Vec<_> = store.stream(2).await.collect();
        assert_eq!(collected, collected_again);
    }
}
