//! Storage abstraction.
//!
//! The pipeline and scheduler depend on this trait only; `LibSqlBackend` is
//! the production implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{ScanRun, ScanStatus, Topic};

/// Slim view of a persisted run, used by the scheduler for slot idempotency
/// and by notifications.
#[derive(Debug, Clone)]
pub struct ScanRunSummary {
    pub id: Uuid,
    pub slot: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ScanStatus,
    pub topic_count: usize,
}

/// A persisted topic suggestion.
#[derive(Debug, Clone)]
pub struct StoredTopic {
    pub id: Uuid,
    pub run_id: Uuid,
    pub topic: Topic,
    pub created_at: DateTime<Utc>,
}

/// Async storage operations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the full processed-id set with admission timestamps.
    async fn load_processed_ids(&self) -> Result<HashMap<String, DateTime<Utc>>, DatabaseError>;

    /// Replace the persisted processed-id set with the given snapshot.
    async fn replace_processed_ids(
        &self,
        entries: &[(String, DateTime<Utc>)],
    ) -> Result<(), DatabaseError>;

    /// Persist a completed (or failed) run, including its topics.
    async fn save_scan_run(&self, run: &ScanRun) -> Result<(), DatabaseError>;

    /// The most recently started run, if any.
    async fn load_last_scan_run(&self) -> Result<Option<ScanRunSummary>, DatabaseError>;

    /// Recent topics, newest first.
    async fn list_recent_topics(&self, limit: usize) -> Result<Vec<StoredTopic>, DatabaseError>;
}
