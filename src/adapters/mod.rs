//! Provider Adapter Interface
//!
//! A single, uniform interface vendor LLM APIs are reached through (spec
//! §1/§4.3): `invoke(model, messages, max_output_tokens) -> {text,
//! input_tokens, output_tokens, finish_reason}`. No class hierarchy — just
//! one async trait, matching the teacher's `LLMProvider` shape in
//! `agent/provider.rs` stripped of its local-inference concerns (those are
//! a teacher-specific deployment detail; the spec treats vendor APIs as
//! external collaborators reached only through this adapter boundary).

mod http;

pub use http::OpenAiCompatibleAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgencyResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: FinishReason,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        max_output_tokens: u32,
    ) -> AgencyResult<AdapterResponse>;
}

/// Deterministic in-memory adapter used for tests and for offline/dev
/// bring-up: echoes a fixed-cost response without any network call.
pub struct EchoAdapter;

#[async_trait]
impl ProviderAdapter for EchoAdapter {
    async fn invoke(
        &self,
        _model_id: &str,
        messages: &[ChatMessage],
        max_output_tokens: u32,
    ) -> AgencyResult<AdapterResponse> {
        let input_tokens: u64 = messages
            .iter()
            .map(|m| (m.content.len() as u64).div_ceil(4))
            .sum();
        let text = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let output_tokens = (text.len() as u64).div_ceil(4).min(max_output_tokens as u64);
        Ok(AdapterResponse {
            text,
            input_tokens,
            output_tokens,
            finish_reason: FinishReason::Stop,
        })
    }
}
