//! Durable event record store.
//!
//! Successful events with an `id` are written here after processing, and
//! the same records drive batch deduplication on the next delivery of a
//! duplicate. Two backends are provided: [`RedisEventStore`] for
//! deployments and [`MemoryEventStore`] for tests and local development.

use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Per-request cap of the Redis multi-key lookup; larger id batches are
/// chunked internally.
const DEDUP_CHUNK_SIZE: usize = 100;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur when talking to the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Processing status of a stored event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processed,
    Failed,
    Replayed,
}

/// The persisted record for a processed event, keyed by `eventId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_id: String,
    /// Producer-declared event time, ISO-8601
    pub timestamp: String,
    pub event_name: String,
    pub source: String,
    pub data: Value,
    pub status: EventStatus,
    /// When the router finished processing, ISO-8601
    pub processed_at: String,
    pub retry_count: u32,
    pub attributes: Value,
    /// Absolute expiry in epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
}

impl EventRecord {
    /// Build a `processed` record for an event at store time.
    ///
    /// `timestamp` falls back to `now` when the producer declared none.
    pub fn processed(event: &Event, event_id: &str, now: DateTime<Utc>, ttl: Option<i64>) -> Self {
        Self {
            event_id: event_id.to_string(),
            timestamp: event.timestamp.unwrap_or(now).to_rfc3339(),
            event_name: event.name.clone(),
            source: event.source.clone(),
            data: event.data.clone(),
            status: EventStatus::Processed,
            processed_at: now.to_rfc3339(),
            retry_count: 0,
            attributes: event
                .attributes
                .as_ref()
                .map(|a| serde_json::to_value(a).unwrap_or_else(|_| Value::Object(Default::default())))
                .unwrap_or_else(|| Value::Object(Default::default())),
            ttl,
        }
    }
}

/// Durable record store consumed by the router.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Return the subset of `ids` already present in `table`.
    ///
    /// Implementations must tolerate any batch up to the router's
    /// configured batch size, chunking internally when the backend has a
    /// smaller per-request cap.
    async fn batch_check_duplicates(
        &self,
        table: &str,
        ids: &[String],
    ) -> StoreResult<HashSet<String>>;

    /// Upsert a record keyed by `record.event_id`. `record.ttl` is the
    /// absolute epoch-seconds expiry.
    async fn store_event(&self, table: &str, record: EventRecord) -> StoreResult<()>;
}

/// In-memory record store backed by a `RwLock<HashMap>`.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    tables: Arc<RwLock<HashMap<String, HashMap<String, EventRecord>>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `table`.
    pub async fn count(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(HashMap::len).unwrap_or(0)
    }

    /// Fetch a record by id.
    pub async fn get(&self, table: &str, event_id: &str) -> Option<EventRecord> {
        let tables = self.tables.read().await;
        tables.get(table).and_then(|t| t.get(event_id)).cloned()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn batch_check_duplicates(
        &self,
        table: &str,
        ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        let tables = self.tables.read().await;
        let Some(records) = tables.get(table) else {
            return Ok(HashSet::new());
        };
        Ok(ids
            .iter()
            .filter(|id| records.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn store_event(&self, table: &str, record: EventRecord) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(record.event_id.clone(), record);
        Ok(())
    }
}

/// Record store backed by Redis string keys `{table}:{eventId}` with
/// `EXPIREAT` applied when a TTL is set.
#[derive(Clone)]
pub struct RedisEventStore {
    pool: Pool,
}

impl RedisEventStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn record_key(table: &str, event_id: &str) -> String {
        format!("{table}:{event_id}")
    }

    /// Per-id fallback when a chunk-level lookup fails: individual lookup
    /// errors are swallowed and the id treated as not-duplicate.
    async fn check_ids_individually(
        &self,
        conn: &mut deadpool_redis::Connection,
        table: &str,
        ids: &[String],
        duplicates: &mut HashSet<String>,
    ) {
        for id in ids {
            let exists: Result<u64, _> = cmd("EXISTS")
                .arg(Self::record_key(table, id))
                .query_async(conn)
                .await;

            match exists {
                Ok(n) if n > 0 => {
                    duplicates.insert(id.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        event_id = %id,
                        error = %e,
                        "Individual duplicate lookup failed, treating as not duplicate"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl EventStore for RedisEventStore {
    async fn batch_check_duplicates(
        &self,
        table: &str,
        ids: &[String],
    ) -> StoreResult<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut duplicates = HashSet::new();

        for chunk in ids.chunks(DEDUP_CHUNK_SIZE) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|id| Self::record_key(table, id))
                .collect();

            let values: Result<Vec<Option<String>>, _> =
                cmd("MGET").arg(&keys).query_async(&mut conn).await;

            match values {
                Ok(values) => {
                    for (id, value) in chunk.iter().zip(values) {
                        if value.is_some() {
                            duplicates.insert(id.clone());
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        chunk_size = chunk.len(),
                        error = %e,
                        "Chunk duplicate lookup failed, falling back to individual lookups"
                    );
                    self.check_ids_individually(&mut conn, table, chunk, &mut duplicates)
                        .await;
                }
            }
        }

        Ok(duplicates)
    }

    async fn store_event(&self, table: &str, record: EventRecord) -> StoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let key = Self::record_key(table, &record.event_id);
        let body = serde_json::to_string(&record)?;

        let set_result: Result<(), _> = cmd("SET")
            .arg(&key)
            .arg(&body)
            .query_async(&mut conn)
            .await;
        set_result.map_err(|e| StoreError::Backend(e.to_string()))?;

        if let Some(ttl) = record.ttl {
            let expire_result: Result<(), _> = cmd("EXPIREAT")
                .arg(&key)
                .arg(ttl)
                .query_async(&mut conn)
                .await;
            expire_result.map_err(|e| StoreError::Backend(e.to_string()))?;
        }

        Ok(())
    }
}
