//! Launcher Configuration
//!
//! Environment-driven, mirroring `AgencyConfig` in the teacher's
//! `main.rs`: a plain struct with `Default` and environment overrides, no
//! `clap` (the teacher never reaches for it).

use std::collections::HashMap;
use std::time::Duration;

use crate::webhook::Channel;

#[derive(Debug, Clone)]
pub struct AgencyConfig {
    pub gateway_host: String,
    pub gateway_port: u16,
    pub environment: String,
    pub enable_telemetry: bool,
    pub privacy_tier: bool,
    pub approval_timeout: Duration,
    pub webhook_urls: HashMap<Channel, String>,
    pub chain_log_path: String,
    pub offline_queue_dir: String,
}

impl Default for AgencyConfig {
    fn default() -> Self {
        Self {
            gateway_host: "127.0.0.1".to_string(),
            gateway_port: 18789,
            environment: "development".to_string(),
            enable_telemetry: true,
            privacy_tier: false,
            approval_timeout: Duration::from_secs(15 * 60),
            webhook_urls: HashMap::new(),
            chain_log_path: "state/chain.log".to_string(),
            offline_queue_dir: "state/offline-queue".to_string(),
        }
    }
}

impl AgencyConfig {
    /// Layer environment variable overrides on top of the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GATEWAY_HOST") {
            config.gateway_host = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_PORT") {
            if let Ok(port) = v.parse() {
                config.gateway_port = port;
            }
        }
        if let Ok(v) = std::env::var("NEXUS_ENVIRONMENT") {
            config.environment = v;
        }
        if let Ok(v) = std::env::var("ENABLE_TELEMETRY") {
            config.enable_telemetry = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("PRIVACY_TIER") {
            config.privacy_tier = v == "1" || v.to_lowercase() == "true";
        }
        if let Ok(v) = std::env::var("APPROVAL_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                config.approval_timeout = Duration::from_millis(ms);
            }
        }

        for (channel, env_key) in [
            (Channel::Commands, "WEBHOOK_COMMANDS_URL"),
            (Channel::Api, "WEBHOOK_API_URL"),
            (Channel::FileChanges, "WEBHOOK_FILE_CHANGES_URL"),
            (Channel::Consciousness, "WEBHOOK_CONSCIOUSNESS_URL"),
            (Channel::Alerts, "WEBHOOK_ALERTS_URL"),
            (Channel::HashChain, "WEBHOOK_HASH_CHAIN_URL"),
        ] {
            if let Ok(url) = std::env::var(env_key) {
                config.webhook_urls.insert(channel, url);
            }
        }

        config
    }
}
