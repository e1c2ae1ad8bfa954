//! Approval Gate
//!
//! Queues high-impact operations and awaits a human decision or timeout
//! (spec §4.6). Per-user FIFO protected by a mutex plus a `oneshot` per
//! request for the awaitable decision, matching the suspension idiom the
//! teacher uses for its abortable WebSocket turn handling (`server.rs`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::error::AgencyError;
use crate::event_bus::AgencyEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub req_id: String,
    pub op_id: String,
    pub summary: String,
    pub cost_usd: f64,
    pub requested_ts: DateTime<Utc>,
    pub status: ApprovalStatus,
    pub decided_ts: Option<DateTime<Utc>>,
    pub decider: Option<String>,
}

struct PendingEntry {
    request: ApprovalRequest,
    notify: Option<oneshot::Sender<(ApprovalStatus, Option<String>)>>,
}

pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// FIFO per user. Pending requests are cancelled by shutdown with status
/// `expired`, per spec §5.
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, PendingEntry>>,
    timeout: Duration,
}

impl ApprovalGate {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Enqueue a request and suspend until `approved`, `denied`, or
    /// `expired` (spec §4.4 step 6).
    pub async fn request(&self, op_id: &str, summary: &str, cost_usd: f64) -> Result<ApprovalRequest, AgencyError> {
        let req_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();

        let request = ApprovalRequest {
            req_id: req_id.clone(),
            op_id: op_id.to_string(),
            summary: summary.to_string(),
            cost_usd,
            requested_ts: Utc::now(),
            status: ApprovalStatus::Pending,
            decided_ts: None,
            decider: None,
        };

        {
            let mut guard = self.pending.lock().await;
            guard.insert(
                req_id.clone(),
                PendingEntry {
                    request: request.clone(),
                    notify: Some(tx),
                },
            );
        }

        // Published before awaiting the decision: a caller blocked inside
        // this call has no other way to hand `req_id` to whoever decides
        // it (gateway, webhook listener, etc.).
        crate::event_bus::AGENCY_EVENT_BUS.publish(AgencyEvent::ApprovalRequested {
            req_id: req_id.clone(),
            op_id: op_id.to_string(),
            summary: summary.to_string(),
            cost_usd,
        });

        let decision = tokio::time::timeout(self.timeout, rx).await;

        let mut guard = self.pending.lock().await;
        match decision {
            Ok(Ok((status, decider))) => {
                if let Some(entry) = guard.get_mut(&req_id) {
                    entry.request.status = status;
                    entry.request.decided_ts = Some(Utc::now());
                    entry.request.decider = decider.clone();
                    let result = entry.request.clone();
                    guard.remove(&req_id);
                    return Ok(result);
                }
                Err(AgencyError::fatal("approval request vanished"))
            }
            Ok(Err(_)) | Err(_) => {
                if let Some(entry) = guard.get_mut(&req_id) {
                    if entry.request.status == ApprovalStatus::Pending {
                        entry.request.status = ApprovalStatus::Expired;
                        entry.request.decided_ts = Some(Utc::now());
                    }
                    let result = entry.request.clone();
                    guard.remove(&req_id);
                    return Ok(result);
                }
                Err(AgencyError::fatal("approval request vanished"))
            }
        }
    }

    /// Decide a pending request. Terminal statuses are final: a request
    /// decided twice keeps the first decision (spec §8 idempotence
    /// property).
    pub async fn decide(&self, req_id: &str, approved: bool, decider: &str) -> bool {
        let mut guard = self.pending.lock().await;
        let Some(entry) = guard.get_mut(req_id) else {
            return false;
        };
        if entry.request.status != ApprovalStatus::Pending {
            return false;
        }
        if let Some(tx) = entry.notify.take() {
            let status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Denied
            };
            let _ = tx.send((status, Some(decider.to_string())));
            crate::event_bus::AGENCY_EVENT_BUS.publish(AgencyEvent::ApprovalDecided {
                req_id: req_id.to_string(),
                approved,
            });
            true
        } else {
            false
        }
    }

    /// Shutdown hook: expire every still-pending request.
    pub async fn expire_all(&self) {
        let mut guard = self.pending.lock().await;
        for entry in guard.values_mut() {
            if let Some(tx) = entry.notify.take() {
                let _ = tx.send((ApprovalStatus::Expired, None));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decided_twice_keeps_first_decision() {
        let gate = ApprovalGate::new(Duration::from_secs(5));
        let gate_clone = gate.clone();

        let handle = tokio::spawn(async move { gate_clone.request("op1", "summary", 1.0).await.unwrap() });

        // Give the requester a moment to register.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let pending_id = {
            let guard = gate.pending.lock().await;
            guard.keys().next().unwrap().clone()
        };

        assert!(gate.decide(&pending_id, true, "u-admin").await);
        // Second decision is a no-op since the request is no longer pending in-flight.
        assert!(!gate.decide(&pending_id, false, "u-other").await);

        let result = handle.await.unwrap();
        assert_eq!(result.status, ApprovalStatus::Approved);
        assert_eq!(result.decider.as_deref(), Some("u-admin"));
    }

    #[tokio::test]
    async fn timeout_auto_decides_expired() {
        let gate = ApprovalGate::new(Duration::from_millis(30));
        let result = gate.request("op1", "summary", 1.0).await.unwrap();
        assert_eq!(result.status, ApprovalStatus::Expired);
    }
}
