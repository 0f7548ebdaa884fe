//! Event router: the deduplicating batch processor.
//!
//! [`EventRouter::process_batch`] drives a batch of events through seven
//! steps:
//!
//! ```text
//! batch of events ─▶ process_batch
//!                      │
//!                      ├─▶ (1) batch dedup query → unique set
//!                      ├─▶ (2) group per event by plugin mode
//!                      ├─▶ (3) Phase A: async groups, in parallel
//!                      ├─▶ (4) Phase B: sync-inline groups, in parallel
//!                      ├─▶ (5) partition into succeeded / failed
//!                      ├─▶ (6) store succeeded events, in parallel
//!                      └─▶ (7) send failure envelopes to the DLQ
//! ```
//!
//! Phase A completes entirely before Phase B begins: async plugins execute
//! before sync plugins. Individual event failures are not raised as
//! errors; they surface as DLQ envelopes. `process_batch` returns `Err`
//! only on critical failures outside per-event scope, which the upstream
//! driver answers by redelivering the whole batch.

use crate::dlq::{DlqEntry, DlqSink, FailureEnvelope};
use crate::event::Event;
use crate::manager::PluginManager;
use crate::plugin::{ExecutionStrategy, PluginMode};
use crate::store::{EventRecord, EventStore};
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Router configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Table holding processed-event records, also the dedup source
    #[serde(default = "default_events_table")]
    pub events_table: String,

    /// Dead letter sink address. When absent, failed events are logged
    /// and lost.
    #[serde(default)]
    pub dlq_url: Option<String>,

    /// Maximum events per batch read by the queue driver
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retention of stored records in days; `0` disables expiry
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            events_table: default_events_table(),
            dlq_url: None,
            batch_size: default_batch_size(),
            ttl_days: default_ttl_days(),
        }
    }
}

fn default_events_table() -> String {
    "axon:events:records".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_ttl_days() -> u32 {
    30
}

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Unrecoverable failure outside per-event scope (programmer error,
    /// registry corruption). The upstream driver reacts by redelivering
    /// the entire batch.
    #[error("critical batch failure: {0}")]
    Critical(String),
}

/// Outcome of one batch invocation.
#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Events handed in
    pub total: usize,
    /// Events surviving deduplication
    pub unique: usize,
    /// Unique events with no captured plugin failure
    pub succeeded: usize,
    /// Unique events with at least one captured plugin failure
    pub failed: usize,
    pub duration_ms: u64,
}

/// An error captured during a dispatch phase, keyed by
/// `event.id || event.name` in the phase error maps.
#[derive(Debug, Clone)]
struct CapturedError {
    message: String,
    /// Rendered source chain, when the error has one
    stack: Option<String>,
}

fn capture_error(err: &(dyn StdError + 'static)) -> CapturedError {
    let mut chain = Vec::new();
    let mut source = err.source();
    while let Some(s) = source {
        chain.push(s.to_string());
        source = s.source();
    }

    CapturedError {
        message: err.to_string(),
        stack: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
    }
}

/// One dispatch group: an index into the unique set plus the names of the
/// plugins to invoke for that event.
type DispatchGroup = (usize, Vec<String>);

/// The batch processor orchestrating deduplication, phased plugin
/// dispatch, durable storage and DLQ emission.
pub struct EventRouter {
    config: RouterConfig,
    manager: PluginManager,
    store: Arc<dyn EventStore>,
    dlq: Arc<dyn DlqSink>,
}

impl EventRouter {
    pub fn new(
        config: RouterConfig,
        manager: PluginManager,
        store: Arc<dyn EventStore>,
        dlq: Arc<dyn DlqSink>,
    ) -> Self {
        Self {
            config,
            manager,
            store,
            dlq,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Process one batch of events end to end.
    ///
    /// Duplicate events (per the record store) are dropped up front.
    /// Events whose key (`id`, falling back to `name`) collides in the
    /// error maps overwrite each other; the last captured error survives.
    pub async fn process_batch(&self, events: Vec<Event>) -> Result<BatchSummary, RouterError> {
        let started = Instant::now();
        let total = events.len();

        info!(count = total, "Processing batch of {} events", total);

        if events.is_empty() {
            return Ok(BatchSummary {
                total: 0,
                unique: 0,
                succeeded: 0,
                failed: 0,
                duration_ms: elapsed_ms(started),
            });
        }

        // Step 1: deduplicate against the record store
        let unique = self.deduplicate(events).await;
        if unique.is_empty() {
            info!("All events are duplicates, skipping processing");
            return Ok(BatchSummary {
                total,
                unique: 0,
                succeeded: 0,
                failed: 0,
                duration_ms: elapsed_ms(started),
            });
        }
        info!(
            count = unique.len(),
            "After deduplication: {} unique events",
            unique.len()
        );

        // Step 2: group each event's matching plugins by dispatch mode
        let (async_groups, sync_inline_groups, sync_worker_groups) =
            self.group_by_mode(&unique).await;

        // Step 3: Phase A, all async groups in parallel
        let async_errors = self.run_phase(&unique, &async_groups).await;
        let async_invocations: usize = async_groups.iter().map(|(_, names)| names.len()).sum();
        info!(
            invocations = async_invocations,
            events = async_groups.len(),
            "Executed {} async plugin invocations across {} events",
            async_invocations,
            async_groups.len()
        );

        // Step 4: Phase B, sync-inline groups; the worker strategy is a
        // declared stub and is skipped with a warning
        if !sync_worker_groups.is_empty() {
            let skipped: usize = sync_worker_groups.iter().map(|(_, names)| names.len()).sum();
            warn!(
                invocations = skipped,
                "Worker invocation not implemented; {} invocations skipped", skipped
            );
        }
        let sync_errors = self.run_phase(&unique, &sync_inline_groups).await;

        // Step 5: partition by the merged error map (sync wins collisions)
        let mut errors = async_errors;
        errors.extend(sync_errors);

        let (failed, succeeded): (Vec<&Event>, Vec<&Event>) = unique
            .iter()
            .partition(|event| errors.contains_key(event.key()));

        // Step 6: store succeeded events that carry an id
        self.store_succeeded(&succeeded).await;

        // Step 7: ship failures to the DLQ
        self.send_failures(&failed, &errors).await;

        let summary = BatchSummary {
            total,
            unique: unique.len(),
            succeeded: succeeded.len(),
            failed: failed.len(),
            duration_ms: elapsed_ms(started),
        };
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "Batch completed: {} succeeded, {} failed in {} ms",
            summary.succeeded,
            summary.failed,
            summary.duration_ms
        );

        Ok(summary)
    }

    /// Drop events whose id is already recorded. A failing dedup query
    /// falls back to treating every event as unique: plugins are required
    /// to be idempotent, and duplicate processing beats data loss.
    async fn deduplicate(&self, events: Vec<Event>) -> Vec<Event> {
        let ids: Vec<String> = events.iter().filter_map(|e| e.id.clone()).collect();
        if ids.is_empty() {
            return events;
        }

        match self
            .store
            .batch_check_duplicates(&self.config.events_table, &ids)
            .await
        {
            Ok(duplicates) => {
                if duplicates.is_empty() {
                    return events;
                }
                info!(
                    count = duplicates.len(),
                    "Found {} duplicate events",
                    duplicates.len()
                );
                events
                    .into_iter()
                    .filter(|e| e.id.as_ref().map_or(true, |id| !duplicates.contains(id)))
                    .collect()
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Batch deduplication failed, falling back to processing all events as unique"
                );
                events
            }
        }
    }

    async fn group_by_mode(
        &self,
        unique: &[Event],
    ) -> (Vec<DispatchGroup>, Vec<DispatchGroup>, Vec<DispatchGroup>) {
        let plugins = self.manager.plugins().await;

        let mut async_groups = Vec::new();
        let mut sync_inline_groups = Vec::new();
        let mut sync_worker_groups = Vec::new();

        for (idx, event) in unique.iter().enumerate() {
            let mut async_names = Vec::new();
            let mut inline_names = Vec::new();
            let mut worker_names = Vec::new();

            for plugin in &plugins {
                if !plugin.filter().matches(&event.name) {
                    continue;
                }
                match plugin.mode() {
                    PluginMode::Async => async_names.push(plugin.name().to_string()),
                    PluginMode::Sync => match plugin.metadata().execution_strategy {
                        ExecutionStrategy::Inline => inline_names.push(plugin.name().to_string()),
                        ExecutionStrategy::Worker => worker_names.push(plugin.name().to_string()),
                    },
                }
            }

            if !async_names.is_empty() {
                async_groups.push((idx, async_names));
            }
            if !inline_names.is_empty() {
                sync_inline_groups.push((idx, inline_names));
            }
            if !worker_names.is_empty() {
                sync_worker_groups.push((idx, worker_names));
            }
        }

        (async_groups, sync_inline_groups, sync_worker_groups)
    }

    /// Dispatch every group concurrently and join, producing the phase's
    /// error map. Per-plugin failures arrive through the dispatch report;
    /// an error raised by the trigger call itself is captured under the
    /// same key.
    async fn run_phase(
        &self,
        unique: &[Event],
        groups: &[DispatchGroup],
    ) -> HashMap<String, CapturedError> {
        let tasks = groups.iter().map(|(idx, names)| {
            let event = &unique[*idx];
            async move {
                match self.manager.trigger_event(event, Some(names.as_slice())).await {
                    Ok(result) => result
                        .first_failure()
                        .map(|failure| (event.key().to_string(), capture_error(&failure.error))),
                    Err(e) => Some((event.key().to_string(), capture_error(&e))),
                }
            }
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    /// Store records for succeeded events carrying an id. A storage
    /// failure is logged but does not reclassify the event: its side
    /// effects already ran.
    async fn store_succeeded(&self, succeeded: &[&Event]) {
        let storable: Vec<(&Event, &str)> = succeeded
            .iter()
            .filter_map(|e| e.id.as_deref().map(|id| (*e, id)))
            .collect();
        if storable.is_empty() {
            return;
        }

        let now = Utc::now();
        let ttl = (self.config.ttl_days > 0)
            .then(|| now.timestamp() + i64::from(self.config.ttl_days) * 86_400);

        let tasks = storable.iter().map(|(event, id)| async move {
            let record = EventRecord::processed(event, id, now, ttl);
            match self
                .store
                .store_event(&self.config.events_table, record)
                .await
            {
                Ok(()) => true,
                Err(e) => {
                    error!(event_id = %id, error = %e, "Failed to store event record");
                    false
                }
            }
        });

        let results = join_all(tasks).await;
        let failures = results.iter().filter(|stored| !**stored).count();

        if failures == 0 {
            info!(
                count = results.len(),
                "Stored {} events in {}",
                results.len(),
                self.config.events_table
            );
        } else {
            error!(
                failures = failures,
                total = results.len(),
                "Failed to store {}/{} events in {}",
                failures,
                results.len(),
                self.config.events_table
            );
        }
    }

    /// Wrap each failed event in an envelope and send the lot as one
    /// batch. A DLQ failure is logged and swallowed; it must not mask the
    /// batch outcome.
    async fn send_failures(&self, failed: &[&Event], errors: &HashMap<String, CapturedError>) {
        if failed.is_empty() {
            return;
        }

        let Some(dlq_url) = &self.config.dlq_url else {
            warn!(
                count = failed.len(),
                "{} events failed but no DLQ configured. Events lost.",
                failed.len()
            );
            return;
        };

        let mut entries = Vec::with_capacity(failed.len());
        for (i, event) in failed.iter().enumerate() {
            let captured = errors.get(event.key());
            let envelope = FailureEnvelope::new(
                (*event).clone(),
                captured.map(|c| c.message.clone()).unwrap_or_default(),
                captured.and_then(|c| c.stack.clone()),
            );

            match serde_json::to_string(&envelope) {
                Ok(body) => entries.push(DlqEntry {
                    id: i.to_string(),
                    message_body: body,
                }),
                Err(e) => {
                    error!(event = %event.key(), error = %e, "Failed to serialize DLQ envelope");
                }
            }
        }

        debug!(count = entries.len(), dlq = %dlq_url, "Sending failure envelopes");
        match self.dlq.send_batch(dlq_url, entries).await {
            Ok(()) => {
                info!(
                    count = failed.len(),
                    "Sent {} failed events to DLQ",
                    failed.len()
                );
            }
            Err(e) => {
                error!(error = %e, "Failed to send failed events to DLQ");
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
