//! Offline Queue
//!
//! Durable FIFO per session, deduplicated by change id, drained on
//! reconnect with ordering preserved (spec §4.12). Persisted as
//! newline-delimited JSON under `state/offline-queue/<session>.log`,
//! the same spawn_blocking-wrapped-file idiom as the chain store.

use std::collections::HashSet;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::error::{AgencyError, AgencyResult};
use crate::sync::QueuedChange;

pub struct OfflineQueue {
    path: PathBuf,
    seen_ids: HashSet<String>,
    pending: Vec<QueuedChange>,
}

impl OfflineQueue {
    pub async fn open(path: impl Into<PathBuf>) -> AgencyResult<Self> {
        let path = path.into();
        let mut pending = Vec::new();
        let mut seen_ids = HashSet::new();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AgencyError::fatal(format!("failed to create offline queue dir: {e}")))?;
        }

        if path.exists() {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| AgencyError::fatal(format!("failed to read offline queue: {e}")))?;
            for line in content.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let change: QueuedChange = serde_json::from_str(line)
                    .map_err(|e| AgencyError::fatal(format!("corrupt offline queue line: {e}")))?;
                if seen_ids.insert(change.id.clone()) {
                    pending.push(change);
                }
            }
        }

        Ok(Self { path, seen_ids, pending })
    }

    /// Append `change` unless its id was already enqueued.
    pub async fn enqueue(&mut self, change: QueuedChange) -> AgencyResult<()> {
        if !self.seen_ids.insert(change.id.clone()) {
            return Ok(());
        }

        let line = serde_json::to_string(&change)
            .map_err(|e| AgencyError::fatal(format!("failed to serialize queued change: {e}")))?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AgencyError::fatal(format!("failed to open offline queue: {e}")))?;
        file.write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| AgencyError::fatal(format!("failed to append offline queue: {e}")))?;
        file.sync_data()
            .await
            .map_err(|e| AgencyError::fatal(format!("failed to fsync offline queue: {e}")))?;

        self.pending.push(change);
        Ok(())
    }

    /// Drain the queue in FIFO order on reconnect, clearing the on-disk
    /// log once drained.
    pub async fn drain(&mut self) -> AgencyResult<Vec<QueuedChange>> {
        let drained = std::mem::take(&mut self.pending);
        self.seen_ids.clear();
        if self.path.exists() {
            tokio::fs::remove_file(&self.path)
                .await
                .map_err(|e| AgencyError::fatal(format!("failed to clear offline queue: {e}")))?;
        }
        Ok(drained)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{Delta, DeltaOp, VectorClock};
    use chrono::Utc;
    use tempfile::tempdir;

    fn change(id: &str) -> QueuedChange {
        QueuedChange {
            id: id.to_string(),
            delta: Delta {
                entity_kind: "session_message".to_string(),
                entity_id: "m1".to_string(),
                op: DeltaOp::Insert,
                changed_fields: Default::default(),
                vector_clock: VectorClock::new(),
                ts: Utc::now(),
            },
            enqueued_ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dedupes_by_change_id() {
        let dir = tempdir().unwrap();
        let mut queue = OfflineQueue::open(dir.path().join("s1.log")).await.unwrap();
        queue.enqueue(change("c1")).await.unwrap();
        queue.enqueue(change("c1")).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn drain_preserves_fifo_order_and_clears_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s1.log");
        let mut queue = OfflineQueue::open(&path).await.unwrap();
        queue.enqueue(change("c1")).await.unwrap();
        queue.enqueue(change("c2")).await.unwrap();

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, "c1");
        assert_eq!(drained[1].id, "c2");
        assert!(queue.is_empty());
        assert!(!path.exists());
    }
}
