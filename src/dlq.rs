//! Dead letter sink for failed events.
//!
//! Events whose plugin dispatch failed are wrapped in a
//! [`FailureEnvelope`] and sent to the configured sink as one batch per
//! processed batch. The Redis-backed sink appends envelopes to a stream,
//! trimmed to a bounded length.

use crate::event::Event;
use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::redis::cmd;
use deadpool_redis::Pool;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Maximum entries kept in a Redis DLQ stream (older entries are trimmed)
const DLQ_MAX_LEN: usize = 10000;

/// Errors that can occur when sending to the dead letter sink.
#[derive(Debug, Error)]
pub enum DlqError {
    #[error("DLQ connection error: {0}")]
    Connection(String),

    #[error("DLQ send error: {0}")]
    Backend(String),

    /// Some entries of the batch failed to send
    #[error("{failed}/{total} DLQ entries failed to send")]
    Partial { failed: usize, total: usize },
}

/// One entry of a DLQ batch: an opaque id plus the serialized envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqEntry {
    pub id: String,
    pub message_body: String,
}

/// The error half of a [`FailureEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    pub message: String,
    /// Rendered source chain of the captured error, when one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// JSON structure wrapping a failed event on its way to the DLQ.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEnvelope {
    /// The original event, unmodified
    pub event: Event,
    pub error: EnvelopeError,
    /// ISO-8601 UTC instant at envelope construction
    pub timestamp: String,
}

impl FailureEnvelope {
    /// Wrap `event` with its captured error. An empty message becomes
    /// `"Unknown error"`.
    pub fn new(event: Event, message: String, stack: Option<String>) -> Self {
        let message = if message.is_empty() {
            "Unknown error".to_string()
        } else {
            message
        };
        Self {
            event,
            error: EnvelopeError { message, stack },
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Dead letter sink consumed by the router.
#[async_trait]
pub trait DlqSink: Send + Sync {
    /// Send a batch of entries to the sink addressed by `url`. Must accept
    /// at least the router's configured batch size. Partial failures
    /// surface as [`DlqError::Partial`].
    async fn send_batch(&self, url: &str, entries: Vec<DlqEntry>) -> Result<(), DlqError>;
}

/// DLQ sink backed by a Redis stream named by the configured URL.
#[derive(Clone)]
pub struct RedisDlqSink {
    pool: Pool,
}

impl RedisDlqSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DlqSink for RedisDlqSink {
    async fn send_batch(&self, url: &str, entries: Vec<DlqEntry>) -> Result<(), DlqError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| DlqError::Connection(e.to_string()))?;

        let total = entries.len();
        let mut failed = 0usize;

        for entry in &entries {
            // XADD with MAXLEN to prevent unbounded growth
            let result: Result<String, _> = cmd("XADD")
                .arg(url)
                .arg("MAXLEN")
                .arg("~")
                .arg(DLQ_MAX_LEN)
                .arg("*")
                .arg("id")
                .arg(&entry.id)
                .arg("body")
                .arg(&entry.message_body)
                .query_async(&mut conn)
                .await;

            if let Err(e) = result {
                error!(entry_id = %entry.id, error = %e, "Failed to append DLQ entry");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(DlqError::Partial { failed, total });
        }

        info!(stream = %url, count = total, "Appended batch to dead letter stream");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_shape() {
        let event = Event::new("user.created", "test", json!({"n": 1})).with_id("a");
        let envelope =
            FailureEnvelope::new(event.clone(), "connection timeout".to_string(), None);

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["event"]["id"], "a");
        assert_eq!(value["error"]["message"], "connection timeout");
        assert!(value["error"].get("stack").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_envelope_empty_message_becomes_unknown() {
        let event = Event::new("x", "s", json!({}));
        let envelope = FailureEnvelope::new(event, String::new(), None);
        assert_eq!(envelope.error.message, "Unknown error");
    }

    #[test]
    fn test_envelope_preserves_event_exactly() {
        let event = Event::new("x", "s", json!({"deep": {"v": [1, 2, 3]}})).with_id("evt");
        let envelope = FailureEnvelope::new(event.clone(), "boom".to_string(), None);

        let body = serde_json::to_string(&envelope).unwrap();
        let parsed: FailureEnvelope = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.event, event);
    }

    #[test]
    fn test_envelope_stack_serialized_when_present() {
        let event = Event::new("x", "s", json!({}));
        let envelope = FailureEnvelope::new(
            event,
            "outer".to_string(),
            Some("caused by: inner".to_string()),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["error"]["stack"], "caused by: inner");
    }
}
