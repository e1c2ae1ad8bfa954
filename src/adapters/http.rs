//! OpenAI-compatible HTTP adapter, generalizing the teacher's
//! `OpenAICompatibleProvider` (`agent/provider.rs`) from a single
//! text-completion helper to the full `ProviderAdapter` contract.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use super::{AdapterResponse, ChatMessage, FinishReason, ProviderAdapter};
use crate::error::{AgencyError, AgencyResult};

pub struct OpenAiCompatibleAdapter {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatibleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            timeout,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    async fn invoke(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        max_output_tokens: u32,
    ) -> AgencyResult<AdapterResponse> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": model_id,
            "messages": messages,
            "max_tokens": max_output_tokens,
        });

        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| AgencyError::adapter_timeout())?
            .map_err(|e| AgencyError::model_unavailable(format!("adapter request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AgencyError::model_unavailable(format!(
                "adapter returned status {}",
                resp.status()
            )));
        }

        let value: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AgencyError::model_unavailable(format!("adapter returned invalid JSON: {e}")))?;

        let text = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let input_tokens = value["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = value["usage"]["completion_tokens"].as_u64().unwrap_or(0);
        let finish_reason = match value["choices"][0]["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some(_) => FinishReason::Stop,
            None => FinishReason::Stop,
        };

        Ok(AdapterResponse {
            text,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }
}
