//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{Category, Difficulty, ScanRun, ScanStatus, Topic};
use crate::store::migrations;
use crate::store::traits::{ScanRunSummary, Store, StoredTopic};

pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn query_err(e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

#[async_trait]
impl Store for LibSqlBackend {
    async fn load_processed_ids(&self) -> Result<HashMap<String, DateTime<Utc>>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT message_id, admitted_at FROM processed_ids", ())
            .await
            .map_err(query_err)?;

        let mut ids = HashMap::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: String = row.get(0).map_err(query_err)?;
            let admitted: String = row.get(1).map_err(query_err)?;
            ids.insert(id, parse_datetime(&admitted));
        }
        Ok(ids)
    }

    async fn replace_processed_ids(
        &self,
        entries: &[(String, DateTime<Utc>)],
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute("DELETE FROM processed_ids", ())
            .await
            .map_err(query_err)?;
        for (id, admitted_at) in entries {
            conn.execute(
                "INSERT OR REPLACE INTO processed_ids (message_id, admitted_at) VALUES (?1, ?2)",
                params![id.as_str(), admitted_at.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        }
        Ok(())
    }

    async fn save_scan_run(&self, run: &ScanRun) -> Result<(), DatabaseError> {
        let counters = serde_json::to_string(&run.counters)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let outcomes = serde_json::to_string(&run.outcomes)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let errors = serde_json::to_string(&run.errors)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn()
            .execute(
                "INSERT OR REPLACE INTO scan_runs
                    (id, slot, started_at, finished_at, status, counters, outcomes, errors, topic_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    run.id.to_string(),
                    run.slot.as_str(),
                    run.started_at.to_rfc3339(),
                    run.finished_at.map(|t| t.to_rfc3339()),
                    run.status.as_str(),
                    counters,
                    outcomes,
                    errors,
                    run.topics.len() as i64,
                ],
            )
            .await
            .map_err(query_err)?;

        for topic in &run.topics {
            let keywords = serde_json::to_string(&topic.keywords)
                .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
            self.conn()
                .execute(
                    "INSERT INTO topics
                        (id, run_id, title, description, difficulty, category, keywords, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        Uuid::new_v4().to_string(),
                        run.id.to_string(),
                        topic.title.as_str(),
                        topic.description.as_str(),
                        topic.difficulty.as_str(),
                        topic.category.as_str(),
                        keywords,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .await
                .map_err(query_err)?;
        }

        Ok(())
    }

    async fn load_last_scan_run(&self) -> Result<Option<ScanRunSummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, slot, started_at, finished_at, status, topic_count
                 FROM scan_runs ORDER BY started_at DESC LIMIT 1",
                (),
            )
            .await
            .map_err(query_err)?;

        let Some(row) = rows.next().await.map_err(query_err)? else {
            return Ok(None);
        };

        let id_str: String = row.get(0).map_err(query_err)?;
        let slot: String = row.get(1).map_err(query_err)?;
        let started: String = row.get(2).map_err(query_err)?;
        let finished: Option<String> = row.get(3).ok();
        let status: String = row.get(4).map_err(query_err)?;
        let topic_count: i64 = row.get(5).map_err(query_err)?;

        Ok(Some(ScanRunSummary {
            id: Uuid::parse_str(&id_str)
                .map_err(|e| DatabaseError::Serialization(format!("bad run id: {e}")))?,
            slot,
            started_at: parse_datetime(&started),
            finished_at: finished.as_deref().map(parse_datetime),
            status: ScanStatus::parse(&status),
            topic_count: topic_count as usize,
        }))
    }

    async fn list_recent_topics(&self, limit: usize) -> Result<Vec<StoredTopic>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, run_id, title, description, difficulty, category, keywords, created_at
                 FROM topics ORDER BY created_at DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(query_err)?;

        let mut topics = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id_str: String = row.get(0).map_err(query_err)?;
            let run_id_str: String = row.get(1).map_err(query_err)?;
            let title: String = row.get(2).map_err(query_err)?;
            let description: String = row.get(3).map_err(query_err)?;
            let difficulty: String = row.get(4).map_err(query_err)?;
            let category: String = row.get(5).map_err(query_err)?;
            let keywords_json: String = row.get(6).map_err(query_err)?;
            let created: String = row.get(7).map_err(query_err)?;

            topics.push(StoredTopic {
                id: Uuid::parse_str(&id_str)
                    .map_err(|e| DatabaseError::Serialization(format!("bad topic id: {e}")))?,
                run_id: Uuid::parse_str(&run_id_str)
                    .map_err(|e| DatabaseError::Serialization(format!("bad run id: {e}")))?,
                topic: Topic {
                    title,
                    description,
                    difficulty: Difficulty::parse(&difficulty).unwrap_or(Difficulty::Intermediate),
                    category: Category::parse(&category).unwrap_or(Category::Tech),
                    keywords: serde_json::from_str(&keywords_json)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                },
                created_at: parse_datetime(&created),
            });
        }
        Ok(topics)
    }
}
