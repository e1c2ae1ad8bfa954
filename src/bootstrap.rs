//! Bootstrap & Port Discovery
//!
//! Fixed seven-step startup order and its mirrored shutdown (spec §4.14),
//! with process hardening folded in as step 0 (ambient carry-over from
//! the teacher's unconditional startup hardening, `utils/hardening.rs`).

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tracing::info;

use crate::chain::ChainStore;
use crate::error::{AgencyError, AgencyResult};
use crate::hardening::process::apply_hardening;
use crate::telemetry::Heartbeat;
use crate::webhook::{Channel, WebhookSink};

/// Exit codes, spec §6.
pub mod exit_code {
    pub const CLEAN: i32 = 0;
    pub const FATAL_STARTUP: i32 = 1;
    pub const PORT_EXHAUSTED: i32 = 2;
    pub const CONFIG_GUARD_REFUSAL: i32 = 3;
}

/// Probe `primary`, then `primary+1..=primary+9`. Fails if none are free.
pub fn discover_port(host: &str, primary: u16) -> AgencyResult<u16> {
    for candidate in primary..=primary.saturating_add(9) {
        let addr: SocketAddr = format!("{host}:{candidate}")
            .parse()
            .map_err(|e| AgencyError::fatal(format!("invalid bind address: {e}")))?;
        if TcpListener::bind(addr).is_ok() {
            return Ok(candidate);
        }
    }
    Err(AgencyError::fatal(format!(
        "no free port in range {primary}..={}",
        primary.saturating_add(9)
    )))
}

/// Step 1: announce startup on the chain and the alerts channel.
pub async fn announce_startup(chain: &Arc<ChainStore>, webhook: &Arc<WebhookSink>) -> AgencyResult<()> {
    let payload = serde_json::json!({ "kind": "startup", "ts": chrono::Utc::now() });
    chain
        .append(payload.clone())
        .await
        .map_err(|e| AgencyError::fatal(format!("startup announce failed: {e}")))?;
    webhook.post_async(Channel::Alerts, "startup", payload);
    Ok(())
}

/// Step 7 mirrored: emit the final "offline" event on shutdown.
pub async fn announce_shutdown(chain: &Arc<ChainStore>, webhook: &Arc<WebhookSink>) -> AgencyResult<()> {
    let payload = serde_json::json!({ "kind": "offline", "ts": chrono::Utc::now() });
    chain
        .append(payload.clone())
        .await
        .map_err(|e| AgencyError::fatal(format!("shutdown announce failed: {e}")))?;
    webhook.post_async(Channel::Alerts, "offline", payload);
    Ok(())
}

/// Step 0 (ambient, not spec-numbered): process hardening before
/// anything security-sensitive runs.
pub fn harden_process() {
    apply_hardening();
    info!("process hardening applied");
}

/// Spawn the heartbeat loop, step 2.
pub fn start_heartbeat(heartbeat: Arc<Heartbeat>) -> tokio::task::JoinHandle<()> {
    heartbeat.spawn()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_first_free_port_in_range() {
        let bound = TcpListener::bind("127.0.0.1:0").unwrap();
        let taken_port = bound.local_addr().unwrap().port();

        let found = discover_port("127.0.0.1", taken_port).unwrap();
        assert_ne!(found, taken_port);
        assert!(found > taken_port && found <= taken_port.saturating_add(9));
    }
}
