//! Per-session sync actor: local/remote change paths, resume/transfer,
//! conflict resolution, and reconnection backoff (spec §4.12).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chain::ChainStore;
use crate::error::{AgencyError, AgencyResult};
use crate::event_bus::{AgencyEvent, EventBus};
use crate::sync::offline_queue::OfflineQueue;
use crate::sync::{clocks_are_incomparable, Conflict, Delta, Origin, Resolution, Session, SessionStatus};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_CAP: Duration = Duration::from_secs(30);
pub const PERIODIC_FULL_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Exponential backoff 1 -> 2 -> 4 -> 8s, capped at 30s, spec §4.12.
pub struct ReconnectBackoff {
    attempt: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self { attempt: 0 }
    }
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = RECONNECT_BASE.saturating_mul(1 << self.attempt).min(RECONNECT_CAP);
        self.attempt += 1;
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

struct SessionState {
    session: Session,
    offline_queue: OfflineQueue,
    connected: bool,
}

/// Owns `sync_state` mutations for every session it tracks, per spec §3's
/// ownership note. Runs as a long-lived task driven by `apply_local` /
/// `on_remote_delta` calls, matching the teacher's per-connection spawned
/// WebSocket actor shape (`server.rs`'s `ws_handler`).
pub struct SessionSyncEngine {
    sessions: RwLock<HashMap<String, SessionState>>,
    chain: Arc<ChainStore>,
    events: Arc<EventBus>,
    queue_dir: std::path::PathBuf,
}

impl SessionSyncEngine {
    pub fn new(chain: Arc<ChainStore>, events: Arc<EventBus>, queue_dir: impl Into<std::path::PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            chain,
            events,
            queue_dir: queue_dir.into(),
        })
    }

    pub async fn register(&self, session: Session) -> AgencyResult<()> {
        let queue_path = self.queue_dir.join(format!("{}.log", session.id));
        let offline_queue = OfflineQueue::open(queue_path).await?;
        self.sessions.write().await.insert(
            session.id.clone(),
            SessionState {
                session,
                offline_queue,
                connected: true,
            },
        );
        Ok(())
    }

    /// Local change path: mutate local session, then either send
    /// `sync.change` (here: emit via the event bus) when connected, or
    /// queue it for later.
    pub async fn apply_local(&self, session_id: &str, delta: Delta) -> AgencyResult<()> {
        let mut guard = self.sessions.write().await;
        let state = guard
            .get_mut(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;

        state.session.sync_state.local_version += 1;
        state.session.last_activity_ts = chrono::Utc::now();

        if state.connected {
            self.events.publish(AgencyEvent::SessionDelta {
                session_id: session_id.to_string(),
            });
        } else {
            state.session.sync_state.pending_changes += 1;
            state
                .offline_queue
                .enqueue(crate::sync::QueuedChange {
                    id: Uuid::new_v4().to_string(),
                    delta,
                    enqueued_ts: chrono::Utc::now(),
                })
                .await?;
        }
        Ok(())
    }

    /// Remote change path: apply unless it conflicts with an unsynced
    /// local edit carrying an incomparable vector clock.
    pub async fn on_remote_delta(&self, session_id: &str, remote: Delta, local_pending: Option<Delta>) -> AgencyResult<Option<Conflict>> {
        let mut guard = self.sessions.write().await;
        let state = guard
            .get_mut(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;

        if let Some(local) = &local_pending {
            if local.entity_id == remote.entity_id && clocks_are_incomparable(&local.vector_clock, &remote.vector_clock) {
                let conflict = Conflict {
                    id: Uuid::new_v4().to_string(),
                    entity_kind: remote.entity_kind.clone(),
                    entity_id: remote.entity_id.clone(),
                    local: local.clone(),
                    remote: remote.clone(),
                    detected_ts: chrono::Utc::now(),
                    resolution: None,
                    resolved_ts: None,
                };
                state.session.sync_state.conflict_count += 1;
                warn!(session_id, entity_id = %remote.entity_id, "sync conflict detected");
                return Ok(Some(conflict));
            }
        }

        state.session.sync_state.remote_version += 1;
        Ok(None)
    }

    /// Resolve a conflict with one of the three strategies, recording the
    /// resolution as a chain event.
    pub async fn resolve_conflict(&self, mut conflict: Conflict, resolution: Resolution) -> AgencyResult<Delta> {
        let chosen = match resolution {
            Resolution::LocalWins => conflict.local.clone(),
            Resolution::RemoteWins => conflict.remote.clone(),
            Resolution::Merge => merge_deltas(&conflict.local, &conflict.remote),
        };

        conflict.resolution = Some(resolution);
        conflict.resolved_ts = Some(chrono::Utc::now());

        self.chain
            .append(serde_json::json!({
                "kind": "conflict_resolved",
                "conflict_id": conflict.id,
                "entity_id": conflict.entity_id,
                "resolution": resolution,
            }))
            .await
            .map_err(|e| AgencyError::fatal(format!("chain append failed: {e}")))?;

        Ok(chosen)
    }

    /// `resume(session_id)`: fetch canonical session from the peer,
    /// mark local origin, set status active. Mutually exclusive with
    /// `transfer` per session.
    pub async fn resume(&self, session_id: &str, canonical: Session) -> AgencyResult<()> {
        let mut guard = self.sessions.write().await;
        if let Some(state) = guard.get_mut(session_id) {
            if state.session.status == SessionStatus::Transferred {
                return Err(AgencyError::conflict_unresolved("session already transferred; cannot resume"));
            }
        }
        let mut session = canonical;
        session.origin = Origin::Local;
        session.status = SessionStatus::Active;
        guard.insert(
            session_id.to_string(),
            SessionState {
                session,
                offline_queue: OfflineQueue::open(self.queue_dir.join(format!("{session_id}.log"))).await?,
                connected: true,
            },
        );
        Ok(())
    }

    /// `transfer(session_id, to_origin)`: flush pending changes, flip
    /// origin and status, record a transfer event on the chain.
    pub async fn transfer(&self, session_id: &str, to_origin: Origin) -> AgencyResult<()> {
        let mut guard = self.sessions.write().await;
        let state = guard
            .get_mut(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;

        if state.session.status == SessionStatus::Transferred {
            return Err(AgencyError::conflict_unresolved("session already transferred"));
        }

        let flushed = state.offline_queue.drain().await?;
        state.session.sync_state.pending_changes = 0;
        state.session.origin = to_origin;
        state.session.status = SessionStatus::Transferred;

        self.chain
            .append(serde_json::json!({
                "kind": "session_transferred",
                "session_id": session_id,
                "to_origin": to_origin,
                "flushed_changes": flushed.len(),
            }))
            .await
            .map_err(|e| AgencyError::fatal(format!("chain append failed: {e}")))?;

        info!(session_id, "session transferred");
        Ok(())
    }

    pub async fn set_connected(&self, session_id: &str, connected: bool) {
        if let Some(state) = self.sessions.write().await.get_mut(session_id) {
            state.connected = connected;
        }
    }

    /// Append a message to a session's history. `memory.search`/
    /// `memory.delete` operate over this history; its content is opaque
    /// to the engine, which never parses or synthesizes it (spec §1).
    pub async fn append_message(&self, session_id: &str, message: crate::sync::SessionMessage) -> AgencyResult<()> {
        let mut guard = self.sessions.write().await;
        let state = guard
            .get_mut(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;
        state.session.messages.push(message);
        Ok(())
    }

    /// Substring search over a session's message history. No semantic
    /// indexing: the engine only stores and returns opaque content.
    pub async fn search_messages(&self, session_id: &str, query: &str) -> AgencyResult<Vec<crate::sync::SessionMessage>> {
        let guard = self.sessions.read().await;
        let state = guard
            .get(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;
        Ok(state
            .session
            .messages
            .iter()
            .filter(|m| m.content.contains(query))
            .cloned()
            .collect())
    }

    /// Remove messages by id, logging the deletion (not the deleted
    /// content) as a chain event.
    pub async fn delete_messages(&self, session_id: &str, message_ids: &[String]) -> AgencyResult<usize> {
        let removed = {
            let mut guard = self.sessions.write().await;
            let state = guard
                .get_mut(session_id)
                .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;
            let before = state.session.messages.len();
            state.session.messages.retain(|m| !message_ids.contains(&m.id));
            before - state.session.messages.len()
        };

        self.chain
            .append(serde_json::json!({
                "kind": "memory_deleted",
                "session_id": session_id,
                "removed": removed,
            }))
            .await
            .map_err(|e| AgencyError::fatal(format!("chain append failed: {e}")))?;

        Ok(removed)
    }

    /// Drain a session's offline queue, in FIFO order, on reconnect.
    pub async fn drain_offline_queue(&self, session_id: &str) -> AgencyResult<Vec<crate::sync::QueuedChange>> {
        let mut guard = self.sessions.write().await;
        let state = guard
            .get_mut(session_id)
            .ok_or_else(|| AgencyError::fatal(format!("unknown session {session_id}")))?;
        let drained = state.offline_queue.drain().await?;
        state.session.sync_state.pending_changes = 0;
        state.session.sync_state.last_sync_ts = Some(chrono::Utc::now());
        Ok(drained)
    }
}

/// `merge`: append-both for text content; structured data fields merge
/// field-by-field by last-writer-wins on `ts`, breaking ties
/// lexicographically by origin id (spec §4.12).
fn merge_deltas(local: &Delta, remote: &Delta) -> Delta {
    let mut merged = local.clone();
    for (field, remote_value) in &remote.changed_fields {
        let keep_remote = remote.ts > local.ts || (remote.ts == local.ts && remote.entity_id > local.entity_id);
        if keep_remote || !merged.changed_fields.contains_key(field) {
            merged.changed_fields.insert(field.clone(), remote_value.clone());
        }
    }
    merged.vector_clock = merge_vector_clocks(&local.vector_clock, &remote.vector_clock);
    merged.ts = local.ts.max(remote.ts);
    merged
}

fn merge_vector_clocks(a: &crate::sync::VectorClock, b: &crate::sync::VectorClock) -> crate::sync::VectorClock {
    let mut merged = a.clone();
    for (origin, counter) in b {
        let entry = merged.entry(origin.clone()).or_insert(0);
        *entry = (*entry).max(*counter);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_thirty_seconds() {
        let mut backoff = ReconnectBackoff::new();
        let delays: Vec<Duration> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(2));
        assert_eq!(delays[2], Duration::from_secs(4));
        assert_eq!(delays[3], Duration::from_secs(8));
        assert_eq!(delays[4], Duration::from_secs(30));
        assert_eq!(delays[5], Duration::from_secs(30));
    }

    #[tokio::test]
    async fn search_and_delete_operate_on_opaque_message_content() {
        let dir = tempfile::tempdir().unwrap();
        let chain = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
        let events = Arc::new(EventBus::new());
        let engine = SessionSyncEngine::new(chain, events, dir.path().join("offline"));

        let session = Session::new("s1", "u1", Origin::Local);
        engine.register(session).await.unwrap();

        engine
            .append_message(
                "s1",
                crate::sync::SessionMessage {
                    id: "m1".to_string(),
                    session_id: "s1".to_string(),
                    role: crate::sync::Role::User,
                    content: "remember to call the dentist".to_string(),
                    ts: chrono::Utc::now(),
                    origin: Origin::Local,
                    metadata: None,
                },
            )
            .await
            .unwrap();
        engine
            .append_message(
                "s1",
                crate::sync::SessionMessage {
                    id: "m2".to_string(),
                    session_id: "s1".to_string(),
                    role: crate::sync::Role::Assistant,
                    content: "noted".to_string(),
                    ts: chrono::Utc::now(),
                    origin: Origin::Local,
                    metadata: None,
                },
            )
            .await
            .unwrap();

        let hits = engine.search_messages("s1", "dentist").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m1");

        let removed = engine.delete_messages("s1", &["m1".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(engine.search_messages("s1", "dentist").await.unwrap().is_empty());
    }
}
