//! Internal Event Bus
//!
//! A centralized async pub/sub for cross-component notification, grounded
//! on the teacher's `orchestrator/event_bus.rs`. Used so that every
//! chain append that is user-visible can also be emitted as a delta on the
//! session-sync channel (spec §2's data-flow note), without the chain
//! store needing to know the sync engine exists.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgencyEvent {
    ChainAppended { seq: u64, payload: Value },
    ApprovalRequested { req_id: String, op_id: String, summary: String, cost_usd: f64 },
    ApprovalDecided { req_id: String, approved: bool },
    SessionDelta { session_id: String },
    Heartbeat { seq: u64 },
    OpsStreamChunk { op_id: String, seq: u32, text: String, done: bool },
}

pub struct EventBus {
    tx: broadcast::Sender<AgencyEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn publish(&self, event: AgencyEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgencyEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// Global singleton, following the teacher's pattern for process-wide
    /// coordination resources (chain store, cost tracker, etc. are all
    /// singletons with an explicit init/shutdown lifecycle per spec §9;
    /// this one has no state to shut down so a lazy static is sufficient).
    pub static ref AGENCY_EVENT_BUS: Arc<EventBus> = Arc::new(EventBus::new());
}
