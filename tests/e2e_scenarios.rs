//! End-to-end scenarios spanning router + chain + approval + webhook,
//! in the style of the teacher's top-level `tests/e2e_scenarios.rs`.
//! A tiny in-process axum server stands in for the webhook endpoint so
//! the pre-execution log's fail-closed path has somewhere real to post.

use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nexus_agency::adapters::{ChatMessage, EchoAdapter};
use nexus_agency::chain::ChainStore;
use nexus_agency::hardening::rate_limiter::RateLimiter;
use nexus_agency::router::{
    AiOperationRouter, ApprovalGate, CostTracker, Criticality, OpKind, OperationRequest, ProviderRegistry,
};
use nexus_agency::webhook::{Channel, WebhookSink};

async fn mock_webhook_base() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/", get(|| async { "ok" })).fallback(|| async { "ok" });
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

fn webhook_urls(base: &str) -> HashMap<Channel, String> {
    [
        Channel::Api,
        Channel::Alerts,
        Channel::HashChain,
        Channel::Commands,
        Channel::Consciousness,
        Channel::FileChanges,
    ]
    .into_iter()
    .map(|c| (c, base.to_string()))
    .collect()
}

fn base_request(op_id: &str, content: &str) -> OperationRequest {
    OperationRequest {
        op_id: op_id.to_string(),
        user_id: "user-1".to_string(),
        op_kind: OpKind::Chat,
        input_tokens_est: 50,
        criticality: Criticality::Low,
        approval_threshold_usd: 10.0,
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }],
    }
}

#[tokio::test]
async fn chat_operation_completes_and_is_chain_logged() {
    let dir = tempfile::tempdir().unwrap();
    let chain = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
    let base = mock_webhook_base().await;
    let webhook = Arc::new(WebhookSink::new(webhook_urls(&base)));

    let router = AiOperationRouter::new(
        Arc::new(ProviderRegistry::with_defaults()),
        CostTracker::new(None),
        Arc::new(RateLimiter::new()),
        ApprovalGate::new(Duration::from_secs(5)),
        chain.clone(),
        webhook,
        Arc::new(EchoAdapter),
    );

    let outcome = router.route(base_request("op-1", "hello there")).await.unwrap();
    assert_eq!(outcome.text, "hello there");
    assert!(outcome.record.success);
    assert_eq!(outcome.record.model_id, "frontier-nano");

    let entries: Vec<_> = chain.stream(0).await.collect();
    let kinds: Vec<&str> = entries.iter().filter_map(|e| e.payload.get("kind").and_then(|v| v.as_str())).collect();
    assert!(kinds.contains(&"pre_execution"));
    assert!(kinds.contains(&"post_execution"));
    assert!(chain.verify().await.is_ok());
}

#[tokio::test]
async fn operation_over_budget_is_denied_and_chain_logged() {
    let dir = tempfile::tempdir().unwrap();
    let chain = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
    let base = mock_webhook_base().await;
    let webhook = Arc::new(WebhookSink::new(webhook_urls(&base)));
    let cost_tracker = CostTracker::new(None);
    cost_tracker.set_budget("user-1", 0.0000001).await;

    let router = AiOperationRouter::new(
        Arc::new(ProviderRegistry::with_defaults()),
        cost_tracker,
        Arc::new(RateLimiter::new()),
        ApprovalGate::new(Duration::from_secs(5)),
        chain.clone(),
        webhook,
        Arc::new(EchoAdapter),
    );

    let err = router.route(base_request("op-budget", "hello there")).await.unwrap_err();
    assert_eq!(err.kind, nexus_agency::error::ErrorKind::BudgetExceeded);

    let entries: Vec<_> = chain.stream(0).await.collect();
    assert!(entries.iter().any(|e| e.payload.get("reason").and_then(|v| v.as_str()) == Some("budget")));
}

#[tokio::test]
async fn high_criticality_operation_waits_for_approval_then_completes() {
    let dir = tempfile::tempdir().unwrap();
    let chain = ChainStore::open(dir.path().join("chain.log")).await.unwrap();
    let base = mock_webhook_base().await;
    let webhook = Arc::new(WebhookSink::new(webhook_urls(&base)));
    let approval_gate = ApprovalGate::new(Duration::from_secs(5));

    let router = Arc::new(AiOperationRouter::new(
        Arc::new(ProviderRegistry::with_defaults()),
        CostTracker::new(None),
        Arc::new(RateLimiter::new()),
        approval_gate.clone(),
        chain.clone(),
        webhook,
        Arc::new(EchoAdapter),
    ));

    let mut req = base_request("op-approve", "please proceed");
    req.criticality = Criticality::High;

    let mut events = nexus_agency::event_bus::AGENCY_EVENT_BUS.subscribe();

    let router_clone = router.clone();
    let handle = tokio::spawn(async move { router_clone.route(req).await });

    // The gateway's /v1/approval/decide caller learns req_id the same
    // way: off the ApprovalRequested event, not out-of-band.
    let req_id = loop {
        match events.recv().await.unwrap() {
            nexus_agency::event_bus::AgencyEvent::ApprovalRequested { req_id, op_id, .. } if op_id == "op-approve" => {
                break req_id;
            }
            _ => continue,
        }
    };

    assert!(approval_gate.decide(&req_id, true, "qa-reviewer").await);

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome.text, "please proceed");
    let _ = chain;
}
