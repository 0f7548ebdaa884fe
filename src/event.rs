//! Core event types for Axon.
//!
//! The [`Event`] struct represents an event flowing through the system.
//! Events are ingested via HTTP, queued in Redis Streams, and processed
//! in batches by workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An event flowing through the Axon pipeline.
///
/// # Fields
///
/// - `id`: Caller-assigned identifier. When present it is the deduplication
///   and storage key; events without an `id` pass through plugin dispatch
///   only and are never deduplicated or stored.
/// - `name`: Logical event type used for plugin matching (e.g., "order.created")
/// - `source`: Origin system that emitted the event
/// - `data`: Arbitrary JSON payload; the router never inspects it
///
/// # Example
///
/// ```json
/// {
///   "id": "evt-42",
///   "name": "order.created",
///   "source": "checkout",
///   "data": {
///     "orderId": 42
///   }
/// }
/// ```
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Event {
    /// Caller-assigned identifier, used as the dedup and storage key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event name used for plugin matching (e.g., "order.created")
    pub name: String,

    /// Origin system that emitted this event
    pub source: String,

    /// Arbitrary JSON payload
    pub data: Value,

    /// Producer-declared event time; defaults to the router's wall clock
    /// at store time when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Free-form metadata (region, account, resources, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<HashMap<String, Value>>,
}

impl Event {
    /// Create a new event without an id.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            source: source.into(),
            data,
            timestamp: None,
            attributes: None,
        }
    }

    /// Attach a caller-assigned id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Attach a producer-declared timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Attach free-form attributes.
    pub fn with_attributes(mut self, attributes: HashMap<String, Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// The key under which this event appears in error maps: `id` when
    /// present, otherwise `name`. Two id-less events sharing a name
    /// collide on this key.
    pub fn key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Structural validity: `name` and `source` are non-empty.
    /// Invalid events are skipped by the queue driver, never retried.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.source.is_empty()
    }
}
