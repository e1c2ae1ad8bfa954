//! Pre-execution Logger
//!
//! Not a module so much as a discipline (spec §4.2): anything that "does
//! something of consequence" must log to the chain and the webhook sink,
//! await both, and only then act. A free function rather than a struct,
//! matching the spec's own framing.

use serde_json::Value;
use std::sync::Arc;

use crate::chain::ChainStore;
use crate::error::{AgencyError, AgencyResult};
use crate::webhook::{Channel, WebhookSink};

/// Append `payload` to the chain and post it to the `api` webhook channel,
/// awaiting both. Fails `precondition_unavailable` if either fails —
/// callers must abort the pending action on error, never proceed.
pub async fn precede(chain: &Arc<ChainStore>, webhook: &Arc<WebhookSink>, payload: Value) -> AgencyResult<u64> {
    let seq = chain
        .append(payload.clone())
        .await
        .map_err(|e| AgencyError::precondition_unavailable(format!("chain append failed: {e}")))?;
    webhook.post_blocking(Channel::Api, "pre-execution", &payload).await?;
    Ok(seq)
}
