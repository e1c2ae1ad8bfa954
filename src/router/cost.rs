//! Cost Tracker
//!
//! Rolling daily/monthly spend per user (spec §4.5). The in-memory copy is
//! authoritative during a run; a background task reconciles it to the
//! external datastore every 5s (spec §5), mirroring the teacher's
//! `AutonomyLedger` atomic-counter idiom (`orchestrator/budget.rs`)
//! generalized from a single-process ledger to per-user rolling windows.

use chrono::{Datelike, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::datastore::DataStore;
use crate::router::{ModelDescriptor, OperationRecord};

#[derive(Debug, Clone, Default)]
struct UserSpend {
    daily: HashMap<NaiveDate, f64>,
    monthly: HashMap<(i32, u32), f64>,
}

pub struct CostTracker {
    spend: RwLock<HashMap<String, UserSpend>>,
    budgets: RwLock<HashMap<String, f64>>,
    datastore: Option<Arc<dyn DataStore>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Daily,
    Monthly,
}

impl CostTracker {
    pub fn new(datastore: Option<Arc<dyn DataStore>>) -> Arc<Self> {
        Arc::new(Self {
            spend: RwLock::new(HashMap::new()),
            budgets: RwLock::new(HashMap::new()),
            datastore,
        })
    }

    pub async fn set_budget(&self, user_id: &str, monthly_budget_usd: f64) {
        self.budgets.write().await.insert(user_id.to_string(), monthly_budget_usd);
    }

    /// Estimate the cost of an operation given token counts, per spec
    /// §4.4 step 3.
    pub fn estimate(model: &ModelDescriptor, input_tokens: u64, expected_output_tokens: u64) -> f64 {
        let in_cost = (input_tokens as f64 / 1000.0) * model.price_in_per_1k;
        let out_cost = (expected_output_tokens as f64 / 1000.0) * model.price_out_per_1k;
        in_cost + out_cost
    }

    pub async fn budget_remaining(&self, user_id: &str, window: Window) -> f64 {
        let budget = *self.budgets.read().await.get(user_id).unwrap_or(&f64::INFINITY);
        if budget.is_infinite() {
            return f64::INFINITY;
        }
        let spent = self.spent(user_id, window).await;
        budget - spent
    }

    async fn spent(&self, user_id: &str, window: Window) -> f64 {
        let guard = self.spend.read().await;
        let Some(user) = guard.get(user_id) else {
            return 0.0;
        };
        let now = Utc::now();
        match window {
            Window::Daily => *user.daily.get(&now.date_naive()).unwrap_or(&0.0),
            Window::Monthly => *user.monthly.get(&(now.year(), now.month())).unwrap_or(&0.0),
        }
    }

    /// Mutation point: record a completed operation's actual cost.
    pub async fn record(&self, record: &OperationRecord) {
        let now = Utc::now();
        let mut guard = self.spend.write().await;
        let entry = guard.entry(record.user_id.clone()).or_default();
        *entry.daily.entry(now.date_naive()).or_insert(0.0) += record.cost_usd;
        *entry.monthly.entry((now.year(), now.month())).or_insert(0.0) += record.cost_usd;
        debug!(
            user_id = %record.user_id,
            cost_usd = record.cost_usd,
            "cost tracker recorded operation"
        );

        if let Some(ds) = &self.datastore {
            let _ = ds.upsert_operation_log(record).await;
        }
    }

    pub async fn would_exceed(&self, user_id: &str, additional_cost: f64, window: Window) -> bool {
        let remaining = self.budget_remaining(user_id, window).await;
        remaining.is_finite() && additional_cost > remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::registry::{Health, ModelDescriptor};

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            model_id: "m".to_string(),
            provider_id: "p".to_string(),
            price_in_per_1k: 0.0001,
            price_out_per_1k: 0.0004,
            context_window: 100_000,
            capability_tags: vec!["chat".to_string()],
            health: Health::Up,
        }
    }

    #[test]
    fn estimate_matches_spec_scenario_1() {
        // spec §8 scenario 1: 50k in, 400 expected out.
        let m = model();
        let cost = CostTracker::estimate(&m, 50_000, 400);
        assert!((cost - 0.00516).abs() < 1e-9);
    }

    #[tokio::test]
    async fn budget_exceeded_when_remaining_is_smaller_than_estimate() {
        let tracker = CostTracker::new(None);
        tracker.set_budget("u1", 5.00).await;

        let record = OperationRecord {
            op_id: "op1".to_string(),
            user_id: "u1".to_string(),
            op_kind: "chat".to_string(),
            model_id: "m".to_string(),
            input_tokens: 1000,
            output_tokens: 100,
            cost_usd: 4.998,
            latency_ms: 10,
            success: true,
            quality_score: None,
            ts: Utc::now(),
        };
        tracker.record(&record).await;

        assert!(tracker.would_exceed("u1", 0.00516, Window::Monthly).await);
    }
}
