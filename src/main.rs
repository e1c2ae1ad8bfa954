//! nexus-agency entry point.
//!
//! Fixed startup order (spec §4.14): harden process, announce startup,
//! start heartbeat, load config guard, discover gateway port, init
//! telemetry, open sync engine, serve. Shutdown reverses the order.

use std::sync::Arc;

use anyhow::Result;
use nexus_agency::adapters::{EchoAdapter, OpenAiCompatibleAdapter, ProviderAdapter};
use nexus_agency::bootstrap::{self, exit_code};
use nexus_agency::chain::ChainStore;
use nexus_agency::config::AgencyConfig;
use nexus_agency::hardening::config_guard::ConfigGuard;
use nexus_agency::hardening::rate_limiter::{validate_bind_host, RateLimiter};
use nexus_agency::router::{AiOperationRouter, ApprovalGate, CostTracker, ProviderRegistry};
use nexus_agency::sync::SessionSyncEngine;
use nexus_agency::telemetry::{Heartbeat, NoopTelemetrySink, TelemetryBatcher};
use nexus_agency::webhook::WebhookSink;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");

    let config = AgencyConfig::from_env();
    info!(environment = %config.environment, "starting nexus-agency");

    if let Err(e) = validate_bind_host(&config.gateway_host, &config.environment) {
        error!("refusing to start: {e}");
        std::process::exit(exit_code::CONFIG_GUARD_REFUSAL);
    }

    // Step 0: process hardening, before anything security-sensitive runs.
    bootstrap::harden_process();

    let chain = match ChainStore::open(config.chain_log_path.clone()).await {
        Ok(chain) => chain,
        Err(e) => {
            error!("failed to open chain store: {e}");
            std::process::exit(exit_code::FATAL_STARTUP);
        }
    };
    let webhook = Arc::new(WebhookSink::new(config.webhook_urls.clone()));

    // Step 1: announce startup.
    if let Err(e) = bootstrap::announce_startup(&chain, &webhook).await {
        error!("startup announcement failed: {e}");
        std::process::exit(exit_code::FATAL_STARTUP);
    }

    // Step 2: start the heartbeat.
    let heartbeat = Heartbeat::new(webhook.clone(), nexus_agency::event_bus::AGENCY_EVENT_BUS.clone());
    let _heartbeat_task = bootstrap::start_heartbeat(heartbeat.clone());

    // Step 3: load the config guard. Refuses to start if the passphrase is
    // missing in a non-development environment.
    let passphrase = std::env::var("CONFIG_GUARD_PASSPHRASE").unwrap_or_else(|_| {
        if config.environment == "development" {
            "dev-only-passphrase".to_string()
        } else {
            error!("CONFIG_GUARD_PASSPHRASE is required outside development");
            std::process::exit(exit_code::CONFIG_GUARD_REFUSAL);
        }
    });
    let config_guard = Arc::new(ConfigGuard::new(passphrase.as_bytes(), chain.clone()));

    // Step 4: discover the gateway port.
    let port = match bootstrap::discover_port(&config.gateway_host, config.gateway_port) {
        Ok(port) => port,
        Err(e) => {
            error!("port discovery exhausted: {e}");
            std::process::exit(exit_code::PORT_EXHAUSTED);
        }
    };

    // Step 5: initialize telemetry.
    let telemetry = TelemetryBatcher::new(Arc::new(NoopTelemetrySink), !config.enable_telemetry);
    let _telemetry_flush_task = telemetry.clone().spawn_flush_loop();

    // Step 6: open the session sync engine.
    let sync_engine = SessionSyncEngine::new(
        chain.clone(),
        nexus_agency::event_bus::AGENCY_EVENT_BUS.clone(),
        config.offline_queue_dir.clone(),
    );

    let registry = Arc::new(ProviderRegistry::with_defaults());
    let cost_tracker = CostTracker::new(None);
    let rate_limiter = Arc::new(RateLimiter::new());
    let approval_gate = ApprovalGate::new(config.approval_timeout);

    let adapter: Arc<dyn ProviderAdapter> = {
        let base_url = std::env::var("PROVIDER_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("PROVIDER_API_KEY").ok();
        if api_key.is_none() && config.environment == "development" {
            info!("PROVIDER_API_KEY unset, falling back to the echo adapter");
            Arc::new(EchoAdapter)
        } else {
            Arc::new(OpenAiCompatibleAdapter::new(base_url, api_key, std::time::Duration::from_secs(30)))
        }
    };

    let router = Arc::new(AiOperationRouter::new(
        registry,
        cost_tracker,
        rate_limiter,
        approval_gate.clone(),
        chain.clone(),
        webhook.clone(),
        adapter,
    ));

    // Step 7: serve.
    let app_state = nexus_agency::api::AppState {
        router,
        chain: chain.clone(),
        approval_gate: approval_gate.clone(),
        config_guard,
        sync_engine,
    };
    let app = nexus_agency::api::build_router(app_state);

    let addr = format!("{}:{port}", config.gateway_host);
    info!(addr = %addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    approval_gate.expire_all().await;
    bootstrap::announce_shutdown(&chain, &webhook).await.ok();
    info!("nexus-agency shut down cleanly");
    Ok(())
}
