//! Session Sync Engine
//!
//! Deltas, vector clocks, conflict detection, offline queueing,
//! resume/transfer (spec §3/§4.12). Each session runs as its own actor
//! task communicating over `tokio::sync::mpsc`, mirroring the teacher's
//! WebSocket forwarding tasks spawned per connection in `server.rs`'s
//! `ws_handler`, fanning user-visible chain events out through the
//! broadcast-based `EventBus` (`orchestrator/event_bus.rs`).

mod engine;
mod offline_queue;

pub use engine::{ReconnectBackoff, SessionSyncEngine};
pub use offline_queue::OfflineQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Remote,
    Mobile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub ts: DateTime<Utc>,
    pub origin: Origin,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
    Transferred,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub local_version: u64,
    pub remote_version: u64,
    pub pending_changes: u64,
    pub conflict_count: u64,
    pub last_sync_ts: Option<DateTime<Utc>>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            local_version: 0,
            remote_version: 0,
            pending_changes: 0,
            conflict_count: 0,
            last_sync_ts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub origin: Origin,
    pub start_ts: DateTime<Utc>,
    pub last_activity_ts: DateTime<Utc>,
    pub messages: Vec<SessionMessage>,
    pub sync_state: SyncState,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, origin: Origin) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            status: SessionStatus::Active,
            origin,
            start_ts: now,
            last_activity_ts: now,
            messages: Vec::new(),
            sync_state: SyncState::default(),
        }
    }
}

/// `{origin_id -> counter}`, used to decide happens-before between deltas.
pub type VectorClock = BTreeMap<String, u64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub entity_kind: String,
    pub entity_id: String,
    pub op: DeltaOp,
    pub changed_fields: HashMap<String, serde_json::Value>,
    pub vector_clock: VectorClock,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    LocalWins,
    RemoteWins,
    Merge,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub entity_kind: String,
    pub entity_id: String,
    pub local: Delta,
    pub remote: Delta,
    pub detected_ts: DateTime<Utc>,
    pub resolution: Option<Resolution>,
    pub resolved_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedChange {
    pub id: String,
    pub delta: Delta,
    pub enqueued_ts: DateTime<Utc>,
}

/// Two vector clocks are incomparable (a genuine conflict) when neither
/// dominates the other, spec glossary "Vector clock".
pub fn clocks_are_incomparable(a: &VectorClock, b: &VectorClock) -> bool {
    let mut a_ahead = false;
    let mut b_ahead = false;
    let keys = a.keys().chain(b.keys());
    for k in keys {
        let av = a.get(k).copied().unwrap_or(0);
        let bv = b.get(k).copied().unwrap_or(0);
        if av > bv {
            a_ahead = true;
        } else if bv > av {
            b_ahead = true;
        }
    }
    a_ahead && b_ahead
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_clocks_are_incomparable() {
        let mut a = VectorClock::new();
        a.insert("local".to_string(), 2);
        a.insert("remote".to_string(), 1);

        let mut b = VectorClock::new();
        b.insert("local".to_string(), 1);
        b.insert("remote".to_string(), 2);

        assert!(clocks_are_incomparable(&a, &b));
    }

    #[test]
    fn dominating_clock_is_comparable() {
        let mut a = VectorClock::new();
        a.insert("local".to_string(), 2);
        a.insert("remote".to_string(), 1);

        let mut b = VectorClock::new();
        b.insert("local".to_string(), 1);
        b.insert("remote".to_string(), 1);

        assert!(!clocks_are_incomparable(&a, &b));
    }
}
