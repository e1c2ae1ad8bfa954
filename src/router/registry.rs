//! Provider Registry
//!
//! A static table of model descriptors with a mutable health field,
//! matching spec §4.3: "Registry is a static mapping `model_id ->
//! ModelDescriptor` with a mutable health field." Selection policy lives in
//! the router, not here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Up,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub model_id: String,
    pub provider_id: String,
    pub price_in_per_1k: f64,
    pub price_out_per_1k: f64,
    pub context_window: u64,
    pub capability_tags: Vec<String>,
    pub health: Health,
}

pub struct ProviderRegistry {
    models: RwLock<HashMap<String, ModelDescriptor>>,
}

impl ProviderRegistry {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let map = models.into_iter().map(|m| (m.model_id.clone(), m)).collect();
        Self {
            models: RwLock::new(map),
        }
    }

    /// A small built-in table covering the op_kind capability tags used by
    /// the router's classification step, suitable for local/dev bring-up.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            ModelDescriptor {
                model_id: "frontier-nano".to_string(),
                provider_id: "primary".to_string(),
                price_in_per_1k: 0.0001,
                price_out_per_1k: 0.0004,
                context_window: 128_000,
                capability_tags: vec![
                    "chat".to_string(),
                    "sentiment".to_string(),
                    "email-analyze".to_string(),
                ],
                health: Health::Up,
            },
            ModelDescriptor {
                model_id: "frontier-standard".to_string(),
                provider_id: "primary".to_string(),
                price_in_per_1k: 0.003,
                price_out_per_1k: 0.015,
                context_window: 200_000,
                capability_tags: vec![
                    "chat".to_string(),
                    "memory-synthesis".to_string(),
                    "agent-exec".to_string(),
                    "email-analyze".to_string(),
                ],
                health: Health::Up,
            },
            ModelDescriptor {
                model_id: "vision-standard".to_string(),
                provider_id: "secondary".to_string(),
                price_in_per_1k: 0.002,
                price_out_per_1k: 0.008,
                context_window: 1_000_000,
                capability_tags: vec!["video-understand".to_string()],
                health: Health::Up,
            },
            ModelDescriptor {
                model_id: "audio-standard".to_string(),
                provider_id: "secondary".to_string(),
                price_in_per_1k: 0.0015,
                price_out_per_1k: 0.0015,
                context_window: 300_000,
                capability_tags: vec!["audio-transcribe".to_string(), "tts".to_string()],
                health: Health::Up,
            },
        ])
    }

    pub async fn candidates_for(&self, capability: &str) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .await
            .values()
            .filter(|m| m.health != Health::Down && m.capability_tags.iter().any(|t| t == capability))
            .cloned()
            .collect()
    }

    pub async fn get(&self, model_id: &str) -> Option<ModelDescriptor> {
        self.models.read().await.get(model_id).cloned()
    }

    pub async fn set_health(&self, model_id: &str, health: Health) {
        if let Some(desc) = self.models.write().await.get_mut(model_id) {
            desc.health = health;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn candidates_exclude_down_models() {
        let registry = ProviderRegistry::with_defaults();
        registry.set_health("frontier-nano", Health::Down).await;
        registry.set_health("frontier-standard", Health::Degraded).await;

        let candidates = registry.candidates_for("chat").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].model_id, "frontier-standard");
    }
}
