//! AI Operation Router
//!
//! The central dispatcher: classify, pick a model, estimate cost, gate on
//! rate limit/budget/approval, log pre-execution, invoke the adapter, log
//! post-execution. Mirrors the teacher's `orchestrator/router.rs` heuristic-
//! then-fallback shape, generalized from "route a query to an agent type" to
//! "route an AI operation to a provider/model".

pub mod approval;
pub mod cost;
pub mod registry;

pub use approval::{ApprovalGate, ApprovalRequest, ApprovalStatus, DEFAULT_APPROVAL_TIMEOUT};
pub use cost::{CostTracker, Window};
pub use registry::{Health, ModelDescriptor, ProviderRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::adapters::{ChatMessage, ProviderAdapter};
use crate::chain::ChainStore;
use crate::error::{AgencyError, AgencyResult};
use crate::hardening::rate_limiter::RateLimiter;
use crate::webhook::{Channel, WebhookSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    Chat,
    MemorySynthesis,
    Sentiment,
    AgentExec,
    VideoUnderstand,
    AudioTranscribe,
    Tts,
    EmailAnalyze,
}

impl OpKind {
    pub fn capability_tag(&self) -> &'static str {
        match self {
            OpKind::Chat => "chat",
            OpKind::MemorySynthesis => "memory-synthesis",
            OpKind::Sentiment => "sentiment",
            OpKind::AgentExec => "agent-exec",
            OpKind::VideoUnderstand => "video-understand",
            OpKind::AudioTranscribe => "audio-transcribe",
            OpKind::Tts => "tts",
            OpKind::EmailAnalyze => "email-analyze",
        }
    }

    /// Expected output tokens for cost estimation, spec §4.4 table. The
    /// input-dependent cases (video frames, audio/tts duration) are
    /// resolved by the caller and folded into `input_tokens_est` before
    /// the router sees the request; this returns the op_kind's baseline.
    pub fn expected_output_tokens(&self) -> u64 {
        match self {
            OpKind::Chat => 400,
            OpKind::MemorySynthesis => 800,
            OpKind::Sentiment => 64,
            OpKind::AgentExec => 1024,
            OpKind::VideoUnderstand => 500,
            OpKind::AudioTranscribe => 150,
            OpKind::Tts => 100,
            OpKind::EmailAnalyze => 500,
        }
    }

    /// Adapter invocation timeout, spec §4.4 step 8.
    pub fn invoke_timeout(&self) -> Duration {
        match self {
            OpKind::AudioTranscribe | OpKind::Tts | OpKind::VideoUnderstand => Duration::from_secs(120),
            _ => Duration::from_secs(30),
        }
    }
}

/// Safety margin applied to every cost estimate, spec §4.4.
const ESTIMATE_SAFETY_MARGIN: f64 = 1.2;

/// Extra context reserved past `input_tokens_est` when checking a
/// candidate's `context_window`, spec §4.4 step 2.
const CONTEXT_RESERVE_TOKENS: u64 = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    pub op_id: String,
    pub user_id: String,
    pub op_kind: OpKind,
    pub input_tokens_est: u64,
    pub criticality: Criticality,
    /// Per-user approval threshold in USD; step 6 gates on `c > threshold`.
    pub approval_threshold_usd: f64,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub model_id: String,
    pub provider_id: String,
    pub requires_approval: bool,
    pub estimated_cost_usd: f64,
    pub rationale_tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub op_id: String,
    pub user_id: String,
    pub op_kind: String,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub quality_score: Option<f64>,
    pub ts: DateTime<Utc>,
}

pub struct OperationOutcome {
    pub text: String,
    pub record: OperationRecord,
}

pub struct AiOperationRouter {
    registry: Arc<ProviderRegistry>,
    cost_tracker: Arc<CostTracker>,
    rate_limiter: Arc<RateLimiter>,
    approval_gate: Arc<ApprovalGate>,
    chain: Arc<ChainStore>,
    webhook: Arc<WebhookSink>,
    adapter: Arc<dyn ProviderAdapter>,
}

impl AiOperationRouter {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cost_tracker: Arc<CostTracker>,
        rate_limiter: Arc<RateLimiter>,
        approval_gate: Arc<ApprovalGate>,
        chain: Arc<ChainStore>,
        webhook: Arc<WebhookSink>,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Self {
        Self {
            registry,
            cost_tracker,
            rate_limiter,
            approval_gate,
            chain,
            webhook,
            adapter,
        }
    }

    /// Pick the cheapest healthy candidate with room for the request, per
    /// spec §4.4 step 2: tie-break by output price, then stable model_id
    /// order.
    fn pick_candidate(candidates: &[ModelDescriptor], input_tokens_est: u64) -> Option<ModelDescriptor> {
        let mut fit: Vec<&ModelDescriptor> = candidates
            .iter()
            .filter(|m| m.context_window >= input_tokens_est + CONTEXT_RESERVE_TOKENS)
            .collect();
        fit.sort_by(|a, b| {
            a.price_in_per_1k
                .partial_cmp(&b.price_in_per_1k)
                .unwrap()
                .then_with(|| a.price_out_per_1k.partial_cmp(&b.price_out_per_1k).unwrap())
                .then_with(|| a.model_id.cmp(&b.model_id))
        });
        fit.first().map(|m| (*m).clone())
    }

    async fn deny_on_chain(&self, req: &OperationRequest, reason: &str) -> AgencyResult<u64> {
        self.chain
            .append(serde_json::json!({
                "kind": "denied",
                "op_id": req.op_id,
                "user_id": req.user_id,
                "reason": reason,
            }))
            .await
    }

    pub async fn route(&self, req: OperationRequest) -> AgencyResult<OperationOutcome> {
        let started = std::time::Instant::now();

        // Step 1: classify.
        let candidates = self.registry.candidates_for(req.op_kind.capability_tag()).await;

        // Step 2: pick cheapest healthy candidate with room.
        let chosen = Self::pick_candidate(&candidates, req.input_tokens_est).ok_or_else(|| {
            AgencyError::model_unavailable(format!("no healthy candidate for {:?}", req.op_kind))
        })?;

        // Step 3: estimate cost with the 20% safety margin.
        let expected_out = req.op_kind.expected_output_tokens();
        let estimated_cost =
            CostTracker::estimate(&chosen, req.input_tokens_est, expected_out) * ESTIMATE_SAFETY_MARGIN;

        // Step 4: rate limit (cheap fast-fail, precedes budget).
        self.rate_limiter.check(&req.user_id).await?;

        // Step 5: budget check.
        if self.cost_tracker.would_exceed(&req.user_id, estimated_cost, Window::Monthly).await {
            self.deny_on_chain(&req, "budget").await?;
            return Err(AgencyError::budget_exceeded("monthly budget would be exceeded"));
        }

        // Step 6: approval gate.
        let requires_approval = req.criticality == Criticality::High || estimated_cost > req.approval_threshold_usd;
        if requires_approval {
            self.chain
                .append(serde_json::json!({
                    "kind": "approval_requested",
                    "op_id": req.op_id,
                    "user_id": req.user_id,
                    "estimated_cost_usd": estimated_cost,
                }))
                .await?;

            let summary = format!("{:?} for user {} (${:.5})", req.op_kind, req.user_id, estimated_cost);
            let decision = self.approval_gate.request(&req.op_id, &summary, estimated_cost).await?;

            self.chain
                .append(serde_json::json!({
                    "kind": "approval_decided",
                    "op_id": req.op_id,
                    "status": decision.status,
                    "decider": decision.decider,
                }))
                .await?;

            match decision.status {
                ApprovalStatus::Approved => {}
                ApprovalStatus::Denied => {
                    return Err(AgencyError::approval_denied(
                        decision.decider.unwrap_or_else(|| "unknown".to_string()),
                    ));
                }
                ApprovalStatus::Expired | ApprovalStatus::Pending => {
                    return Err(AgencyError::approval_timeout());
                }
            }
        }

        // Step 7: pre-execution log. Fail-closed on sink failure. The
        // message preview is bounded so a long prompt doesn't blow up the
        // chain entry or the webhook payload.
        let preview = req
            .messages
            .last()
            .map(|m| crate::utils::truncate_text(&m.content, crate::utils::TruncationPolicy::Bytes(500)))
            .unwrap_or_default();
        let pre_payload = serde_json::json!({
            "kind": "pre_execution",
            "op_id": req.op_id,
            "user_id": req.user_id,
            "op_kind": req.op_kind.capability_tag(),
            "model_id": chosen.model_id,
            "est_cost": estimated_cost,
            "preview": preview,
        });
        self.chain
            .append(pre_payload.clone())
            .await
            .map_err(|e| AgencyError::precondition_unavailable(format!("chain append failed: {e}")))?;
        self.webhook
            .post_blocking(Channel::Api, "pre-execution", &pre_payload)
            .await?;

        // Step 8: invoke adapter, with a single alternate-candidate retry.
        let timeout = req.op_kind.invoke_timeout();
        let invoke_result =
            tokio::time::timeout(timeout, self.adapter.invoke(&chosen.model_id, &req.messages, expected_out as u32))
                .await;

        let (invoked, response) = match invoke_result {
            Ok(Ok(resp)) => (chosen.clone(), resp),
            Ok(Err(_)) | Err(_) => {
                self.registry.set_health(&chosen.model_id, Health::Degraded).await;
                warn!(model_id = %chosen.model_id, "adapter invocation failed, retrying on alternate candidate");

                let alternates: Vec<ModelDescriptor> = candidates
                    .iter()
                    .filter(|m| m.model_id != chosen.model_id)
                    .cloned()
                    .collect();
                let alternate = Self::pick_candidate(&alternates, req.input_tokens_est)
                    .ok_or_else(|| AgencyError::model_unavailable("primary adapter failed, no alternate available"))?;

                self.chain
                    .append(serde_json::json!({
                        "kind": "api_request_retry",
                        "op_id": req.op_id,
                        "primary_model_id": chosen.model_id,
                        "alternate_model_id": alternate.model_id,
                    }))
                    .await
                    .map_err(|e| AgencyError::fatal(format!("chain append failed: {e}")))?;

                let resp = tokio::time::timeout(
                    timeout,
                    self.adapter.invoke(&alternate.model_id, &req.messages, expected_out as u32),
                )
                .await
                .map_err(|_| AgencyError::adapter_timeout())?
                .map_err(|e| AgencyError::model_unavailable(format!("alternate adapter also failed: {e}")))?;
                (alternate, resp)
            }
        };

        // Step 9: actual cost, OperationRecord, post-execution log. Both
        // use the descriptor actually invoked (primary or alternate), not
        // the originally chosen one, so pricing and `model_id` reflect
        // what really ran (spec §8 scenario 3).
        let actual_cost = CostTracker::estimate(&invoked, response.input_tokens, response.output_tokens);
        let record = OperationRecord {
            op_id: req.op_id.clone(),
            user_id: req.user_id.clone(),
            op_kind: req.op_kind.capability_tag().to_string(),
            model_id: invoked.model_id.clone(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cost_usd: actual_cost,
            latency_ms: started.elapsed().as_millis() as u64,
            success: true,
            quality_score: None,
            ts: Utc::now(),
        };

        self.cost_tracker.record(&record).await;
        self.chain
            .append(serde_json::json!({ "kind": "post_execution", "record": &record }))
            .await
            .map_err(|e| AgencyError::fatal(format!("chain append failed: {e}")))?;

        info!(op_id = %record.op_id, cost_usd = record.cost_usd, "operation completed");

        // Step 10.
        Ok(OperationOutcome { text: response.text, record })
    }
}
