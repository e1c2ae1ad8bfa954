//! Heartbeat & Telemetry
//!
//! A liveness heartbeat every 60s to the `alerts` webhook channel, plus a
//! batched, anonymized telemetry event queue shipped to a research
//! endpoint trait (spec §4.13). Mirrors the teacher's periodic-tick idiom
//! (`server.rs`'s `tokio::time::interval` metrics broadcaster).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::event_bus::{AgencyEvent, EventBus};
use crate::webhook::{Channel, WebhookSink};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const TELEMETRY_BATCH_SIZE: usize = 25;
const TELEMETRY_BATCH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEventType {
    Heartbeat,
    SessionStart,
    SessionEnd,
    Transformation,
    Anomaly,
    PsychologySnapshot,
    WellnessCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub instance_id: String,
    #[serde(rename = "type")]
    pub kind: TelemetryEventType,
    pub ts: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// Double-hashed digest of coarse machine facts, spec §3/glossary.
pub fn compute_instance_id() -> String {
    let mut sys = System::new();
    sys.refresh_memory();
    let facts = format!("{}-{}-{}", std::env::consts::OS, std::env::consts::ARCH, sys.total_memory());
    let first = Sha256::digest(facts.as_bytes());
    let second = Sha256::digest(first);
    hex::encode(second)
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn ship(&self, batch: &[TelemetryEvent]) -> anyhow::Result<()>;
}

pub struct NoopTelemetrySink;

#[async_trait]
impl TelemetrySink for NoopTelemetrySink {
    async fn ship(&self, _batch: &[TelemetryEvent]) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct Heartbeat {
    webhook: Arc<WebhookSink>,
    events: Arc<EventBus>,
    started_at: Instant,
    seq: AtomicU64,
}

impl Heartbeat {
    pub fn new(webhook: Arc<WebhookSink>, events: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self {
            webhook,
            events,
            started_at: Instant::now(),
            seq: AtomicU64::new(0),
        })
    }

    /// Spawn the 60s heartbeat loop. Absence of these is the primary
    /// tamper signal, per spec §4.2's rationale.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    async fn tick(&self) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let mut sys = System::new();
        sys.refresh_memory();

        let payload = serde_json::json!({
            "seq": seq,
            "uptime": self.started_at.elapsed().as_secs(),
            "mem": sys.used_memory(),
            "load": System::load_average().one,
            "pid": std::process::id(),
        });

        self.events.publish(AgencyEvent::Heartbeat { seq });
        self.webhook.post_async(Channel::Alerts, "heartbeat", payload);
        debug!(seq, "heartbeat tick");
    }
}

pub struct TelemetryBatcher {
    sink: Arc<dyn TelemetrySink>,
    instance_id: String,
    privacy_tier: bool,
    buffer: Mutex<Vec<TelemetryEvent>>,
}

impl TelemetryBatcher {
    pub fn new(sink: Arc<dyn TelemetrySink>, privacy_tier: bool) -> Arc<Self> {
        Arc::new(Self {
            sink,
            instance_id: compute_instance_id(),
            privacy_tier,
            buffer: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue an event. `data` must never contain user content; callers
    /// are responsible for that redaction, this only enforces the
    /// privacy-tier kill switch.
    pub async fn record(&self, kind: TelemetryEventType, data: serde_json::Value) {
        if self.privacy_tier {
            return;
        }
        let event = TelemetryEvent {
            instance_id: self.instance_id.clone(),
            kind,
            ts: Utc::now(),
            data,
        };
        let mut buffer = self.buffer.lock().await;
        buffer.push(event);
        if buffer.len() >= TELEMETRY_BATCH_SIZE {
            let batch = std::mem::take(&mut *buffer);
            drop(buffer);
            self.flush_batch(batch).await;
        }
    }

    async fn flush_batch(&self, batch: Vec<TelemetryEvent>) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.sink.ship(&batch).await {
            warn!("telemetry batch shipment failed: {e}");
        }
    }

    /// Spawn the periodic flush loop (batch-size flush happens inline in
    /// `record`; this covers the 5-minute fallback).
    pub fn spawn_flush_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TELEMETRY_BATCH_INTERVAL);
            loop {
                interval.tick().await;
                if self.privacy_tier {
                    continue;
                }
                let batch = {
                    let mut buffer = self.buffer.lock().await;
                    std::mem::take(&mut *buffer)
                };
                self.flush_batch(batch).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TelemetrySink for CountingSink {
        async fn ship(&self, _batch: &[TelemetryEvent]) -> anyhow::Result<()> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn privacy_tier_disables_recording() {
        let sink = Arc::new(CountingSink { calls: AtomicUsize::new(0) });
        let batcher = TelemetryBatcher::new(sink.clone(), true);
        batcher.record(TelemetryEventType::Heartbeat, serde_json::json!({})).await;
        assert_eq!(batcher.buffer.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn batch_flushes_at_threshold() {
        let sink = Arc::new(CountingSink { calls: AtomicUsize::new(0) });
        let batcher = TelemetryBatcher::new(sink.clone(), false);
        for _ in 0..TELEMETRY_BATCH_SIZE {
            batcher.record(TelemetryEventType::Heartbeat, serde_json::json!({})).await;
        }
        assert_eq!(sink.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(batcher.buffer.lock().await.len(), 0);
    }
}
