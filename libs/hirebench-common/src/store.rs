use crate::types::{Language, TestRunSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

// Summary persistence for callers of the engine. The engine itself never
// touches a store; whoever drives it decides where a summary is kept.

pub const SUMMARY_PREFIX: &str = "hirebench:summary";

/// Deterministic key for a stored run summary
pub fn summary_key(run_id: &Uuid) -> String {
    format!("{}:{}", SUMMARY_PREFIX, run_id)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSummary {
    pub run_id: Uuid,
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub summary: TestRunSummary,
}

impl StoredSummary {
    pub fn new(run_id: Uuid, language: Language, summary: TestRunSummary) -> Self {
        Self {
            run_id,
            language,
            created_at: Utc::now(),
            summary,
        }
    }
}

#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn get(&self, run_id: &Uuid) -> Result<Option<StoredSummary>, StoreError>;
    async fn put(&self, record: &StoredSummary) -> Result<(), StoreError>;
    async fn delete(&self, run_id: &Uuid) -> Result<bool, StoreError>;
}

/// Process-local store, mainly for tests and single-node tools.
#[derive(Default)]
pub struct MemorySummaryStore {
    records: RwLock<HashMap<Uuid, StoredSummary>>,
}

impl MemorySummaryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryStore for MemorySummaryStore {
    async fn get(&self, run_id: &Uuid) -> Result<Option<StoredSummary>, StoreError> {
        Ok(self.records.read().await.get(run_id).cloned())
    }

    async fn put(&self, record: &StoredSummary) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.run_id, record.clone());
        Ok(())
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(run_id).is_some())
    }
}

/// Redis-backed store. Records expire after 24 hours.
#[derive(Clone)]
pub struct RedisSummaryStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisSummaryStore {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl SummaryStore for RedisSummaryStore {
    async fn get(&self, run_id: &Uuid) -> Result<Option<StoredSummary>, StoreError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(summary_key(run_id)).await?;

        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &StoredSummary) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(record)?;

        let _: () = conn.set_ex(summary_key(&record.run_id), payload, 86400).await?;
        Ok(())
    }

    async fn delete(&self, run_id: &Uuid) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(summary_key(run_id)).await?;
        Ok(removed > 0)
    }
}
