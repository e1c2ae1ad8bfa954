//! Webhook Sink Client
//!
//! Posts structured events to N logical channels (`commands`, `api`,
//! `file-changes`, `consciousness`, `alerts`, `hash-chain`, per spec §6).
//! Pre-execution posts are synchronous awaits with a 3s timeout (spec §5);
//! post-execution posts are enqueued to a bounded per-channel worker pool
//! and are fire-and-forget, matching the teacher's "bounded worker pool,
//! `tokio::spawn` per unit of work" idiom (`server.rs`'s metrics
//! broadcaster, `orchestrator/event_bus.rs`'s broadcast channel).

use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{AgencyError, AgencyResult};

const PRE_EXECUTION_TIMEOUT: Duration = Duration::from_secs(3);
const CHANNEL_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Commands,
    Api,
    FileChanges,
    Consciousness,
    Alerts,
    HashChain,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Commands => "commands",
            Channel::Api => "api",
            Channel::FileChanges => "file-changes",
            Channel::Consciousness => "consciousness",
            Channel::Alerts => "alerts",
            Channel::HashChain => "hash-chain",
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    color: u32,
    fields: Vec<EmbedField>,
    footer: String,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct WebhookBody {
    embeds: Vec<Embed>,
}

fn to_embed(title: &str, payload: &Value) -> WebhookBody {
    let mut fields = Vec::new();
    if let Some(map) = payload.as_object() {
        for (k, v) in map {
            fields.push(EmbedField {
                name: k.clone(),
                value: v.to_string(),
                inline: true,
            });
        }
    }
    WebhookBody {
        embeds: vec![Embed {
            title: title.to_string(),
            color: 0x2b6cb0,
            fields,
            footer: "nexus-agency".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }],
    }
}

struct QueuedPost {
    channel: Channel,
    title: String,
    payload: Value,
}

/// Best-effort unless called on the pre-execution path, in which case the
/// caller must treat a failure as `precondition_unavailable`.
pub struct WebhookSink {
    client: Client,
    channel_urls: HashMap<Channel, String>,
    tx: mpsc::Sender<QueuedPost>,
}

impl WebhookSink {
    pub fn new(channel_urls: HashMap<Channel, String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<QueuedPost>(CHANNEL_QUEUE_DEPTH);
        let client = Client::new();
        let worker_client = client.clone();
        let worker_urls = channel_urls.clone();

        tokio::spawn(async move {
            while let Some(post) = rx.recv().await {
                if let Some(url) = worker_urls.get(&post.channel) {
                    let body = to_embed(&post.title, &post.payload);
                    if let Err(e) = worker_client.post(url).json(&body).send().await {
                        warn!("webhook post to {} failed (best-effort): {e}", post.channel.as_str());
                    }
                }
            }
        });

        Self {
            client,
            channel_urls,
            tx,
        }
    }

    /// Synchronously await a post, bounded by a 3s timeout. Used on the
    /// pre-execution path: failure here must abort the pending action.
    pub async fn post_blocking(&self, channel: Channel, title: &str, payload: &Value) -> AgencyResult<()> {
        let Some(url) = self.channel_urls.get(&channel) else {
            debug!("no URL configured for channel {:?}; treating as unavailable", channel);
            return Err(AgencyError::precondition_unavailable(format!(
                "no webhook URL configured for channel {}",
                channel.as_str()
            )));
        };

        let body = to_embed(title, payload);
        let send = self.client.post(url).json(&body).send();

        match tokio::time::timeout(PRE_EXECUTION_TIMEOUT, send).await {
            Ok(Ok(resp)) if resp.status().is_success() => Ok(()),
            Ok(Ok(resp)) => Err(AgencyError::precondition_unavailable(format!(
                "webhook sink returned status {}",
                resp.status()
            ))),
            Ok(Err(e)) => Err(AgencyError::precondition_unavailable(format!("webhook post failed: {e}"))),
            Err(_) => Err(AgencyError::precondition_unavailable("webhook post timed out")),
        }
    }

    /// Enqueue a fire-and-forget post for the post-execution path.
    pub fn post_async(&self, channel: Channel, title: &str, payload: Value) {
        let post = QueuedPost {
            channel,
            title: title.to_string(),
            payload,
        };
        if self.tx.try_send(post).is_err() {
            warn!("webhook queue full, dropping post-execution event for {:?}", channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_channel_url_is_precondition_unavailable() {
        let sink = WebhookSink::new(HashMap::new());
        let err = sink
            .post_blocking(Channel::Api, "test", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::PreconditionUnavailable);
    }
}
