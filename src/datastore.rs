//! Datastore Trait
//!
//! The external cloud database, reached only through this trait's
//! contract (spec §1/§6). Tables: `ai_operation_log`, `user_monthly_spend`,
//! `sessions`/`session_messages`, `chain_entries`. An in-memory
//! implementation backs local/dev use; production deployments supply
//! their own, the way the teacher treats `SqliteTaskQueue` as one
//! concrete impl of the `TaskQueue` trait (`orchestrator/queue.rs`).

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::chain::ChainEntry;
use crate::router::OperationRecord;
use crate::sync::Session;

#[async_trait]
pub trait DataStore: Send + Sync {
    async fn upsert_operation_log(&self, record: &OperationRecord) -> anyhow::Result<()>;
    async fn upsert_monthly_spend(&self, user_id: &str, year: i32, month: u32, total_cost: f64) -> anyhow::Result<()>;
    async fn upsert_session(&self, session: &Session) -> anyhow::Result<()>;
    async fn append_chain_row(&self, entry: &ChainEntry) -> anyhow::Result<()>;
    async fn query_operation_log(&self, user_id: &str) -> anyhow::Result<Vec<OperationRecord>>;
    async fn query_session(&self, session_id: &str) -> anyhow::Result<Option<Session>>;
}

#[derive(Default)]
struct InMemoryTables {
    operation_log: Vec<OperationRecord>,
    monthly_spend: HashMap<(String, i32, u32), f64>,
    sessions: HashMap<String, Session>,
    chain_rows: Vec<ChainEntry>,
}

/// In-memory `DataStore` for local/dev use and tests.
#[derive(Default)]
pub struct InMemoryDataStore {
    tables: RwLock<InMemoryTables>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn upsert_operation_log(&self, record: &OperationRecord) -> anyhow::Result<()> {
        self.tables.write().await.operation_log.push(record.clone());
        Ok(())
    }

    async fn upsert_monthly_spend(&self, user_id: &str, year: i32, month: u32, total_cost: f64) -> anyhow::Result<()> {
        self.tables
            .write()
            .await
            .monthly_spend
            .insert((user_id.to_string(), year, month), total_cost);
        Ok(())
    }

    async fn upsert_session(&self, session: &Session) -> anyhow::Result<()> {
        self.tables.write().await.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn append_chain_row(&self, entry: &ChainEntry) -> anyhow::Result<()> {
        self.tables.write().await.chain_rows.push(entry.clone());
        Ok(())
    }

    async fn query_operation_log(&self, user_id: &str) -> anyhow::Result<Vec<OperationRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .operation_log
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn query_session(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.tables.read().await.sessions.get(session_id).cloned())
    }
}

pub fn current_year_month() -> (i32, u32) {
    let now = Utc::now();
    use chrono::Datelike;
    (now.year(), now.month())
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(user_id: &str) -> OperationRecord {
        OperationRecord {
            op_id: "op1".to_string(),
            user_id: user_id.to_string(),
            op_kind: "chat".to_string(),
            model_id: "m".to_string(),
            input_tokens: 1,
            output_tokens: 1,
            cost_usd: 0.01,
            latency_ms: 5,
            success: true,
            quality_score: None,
            ts: Utc::now(),
        }
    }

    #[tokio::test]
    async fn query_filters_by_user() {
        let store = InMemoryDataStore::new();
        store.upsert_operation_log(&record("u1")).await.unwrap();
        store.upsert_operation_log(&record("u2")).await.unwrap();

        let rows = store.query_operation_log("u1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, "u1");
    }
}
