//! Axon worker: the upstream queue driver.
//!
//! Reads batches of events from the Redis event stream via a consumer
//! group, parses each entry, and hands the batch to
//! [`EventRouter::process_batch`]. On success every entry is acked; on a
//! critical router failure nothing is acked, so the at-least-once stream
//! redelivers the whole batch. Structurally invalid entries are acked and
//! skipped, never retried.
//!
//! ## Configuration
//!
//! TOML config (see `axon::config`) plus environment overrides:
//! - `REDIS_URL`: Redis connection string (overrides `[redis].url`)
//! - `AXON_WORKER_NAME`: unique worker identifier (default: hostname or UUID)
//! - `AXON_CONFIG`: config file path (default: "config/axon.toml")
//! - `RUST_LOG`: logging level (default: "info")

use deadpool_redis::redis::streams::{StreamReadOptions, StreamReadReply};
use deadpool_redis::redis::{cmd, AsyncCommands, Value as RedisValue};
use deadpool_redis::{Config, Pool, Runtime};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use axon::config::AxonConfig;
use axon::dlq::RedisDlqSink;
use axon::event::Event;
use axon::manager::PluginManager;
use axon::router::EventRouter;
use axon::shutdown::ShutdownSignal;
use axon::store::RedisEventStore;
use axon::EVENT_STREAM_NAME;

/// Idle time threshold for claiming pending entries from dead workers
const PENDING_IDLE_THRESHOLD_MS: u64 = 30000;

/// Blocking read timeout per loop iteration
const READ_BLOCK_MS: u64 = 2000;

type StreamEntry = (String, HashMap<String, RedisValue>);

/// Get the worker name from environment, config, hostname, or a UUID.
fn worker_name(config: &AxonConfig) -> String {
    if let Ok(name) = env::var("AXON_WORKER_NAME") {
        return name;
    }

    if let Some(name) = &config.worker.name {
        return name.clone();
    }

    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return format!("worker-{}", name);
        }
    }

    format!("worker-{}", uuid::Uuid::new_v4())
}

/// Parse an event from a stream entry's `body` field. Returns `None` for
/// structurally invalid entries, which are acked and skipped.
fn parse_entry(map: &HashMap<String, RedisValue>) -> Option<Event> {
    let body = match map.get("body") {
        Some(RedisValue::BulkString(bytes)) => String::from_utf8_lossy(bytes).to_string(),
        Some(RedisValue::SimpleString(s)) => s.clone(),
        _ => return None,
    };

    let event: Event = serde_json::from_str(&body).ok()?;
    event.is_valid().then_some(event)
}

/// Claim pending entries that have been idle for too long, so batches
/// from dead workers are not lost. Returns the claimed entries for
/// processing.
async fn claim_pending_entries(
    conn: &mut deadpool_redis::Connection,
    consumer_group: &str,
    worker: &str,
) -> Vec<StreamEntry> {
    // XAUTOCLAIM key group consumer min-idle-time start [COUNT count]
    let result: Result<(String, Vec<StreamEntry>), _> = cmd("XAUTOCLAIM")
        .arg(EVENT_STREAM_NAME)
        .arg(consumer_group)
        .arg(worker)
        .arg(PENDING_IDLE_THRESHOLD_MS)
        .arg("0-0")
        .arg("COUNT")
        .arg(10)
        .query_async(conn)
        .await;

    match result {
        Ok((_, entries)) => {
            if !entries.is_empty() {
                info!(
                    count = entries.len(),
                    "Claimed pending entries from previous workers"
                );
            }
            entries
        }
        Err(e) => {
            // XAUTOCLAIM may be unavailable on older Redis versions
            debug!(error = %e, "XAUTOCLAIM failed, skipping pending recovery");
            Vec::new()
        }
    }
}

async fn ack_entries(
    conn: &mut deadpool_redis::Connection,
    consumer_group: &str,
    ids: &[String],
) {
    if ids.is_empty() {
        return;
    }
    let result: Result<u64, _> = conn.xack(EVENT_STREAM_NAME, consumer_group, ids).await;
    if let Err(e) = result {
        error!(count = ids.len(), error = %e, "Failed to ACK entries");
    }
}

/// Drive one batch of stream entries through the router.
///
/// Invalid entries are acked up front. Valid entries are acked only when
/// the router reports the batch complete; a critical failure leaves them
/// pending for redelivery.
async fn process_entries(
    router: &EventRouter,
    conn: &mut deadpool_redis::Connection,
    consumer_group: &str,
    entries: Vec<StreamEntry>,
) {
    let mut invalid_ids = Vec::new();
    let mut ids = Vec::new();
    let mut events = Vec::new();

    for (id, map) in entries {
        match parse_entry(&map) {
            Some(event) => {
                ids.push(id);
                events.push(event);
            }
            None => {
                debug!(id = %id, "Skipping structurally invalid entry");
                invalid_ids.push(id);
            }
        }
    }

    ack_entries(conn, consumer_group, &invalid_ids).await;

    if events.is_empty() {
        return;
    }

    match router.process_batch(events).await {
        Ok(summary) => {
            debug!(
                succeeded = summary.succeeded,
                failed = summary.failed,
                "Batch acknowledged"
            );
            ack_entries(conn, consumer_group, &ids).await;
        }
        Err(e) => {
            error!(
                count = ids.len(),
                error = %e,
                "Critical batch failure, leaving entries unacked for redelivery"
            );
        }
    }
}

async fn ensure_consumer_group(pool: &Pool, consumer_group: &str) -> Result<(), String> {
    let mut conn = pool.get().await.map_err(|e| e.to_string())?;

    let result: Result<(), _> = cmd("XGROUP")
        .arg("CREATE")
        .arg(EVENT_STREAM_NAME)
        .arg(consumer_group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(&mut conn)
        .await;

    match result {
        Ok(_) => {
            info!(consumer_group = %consumer_group, "Created consumer group");
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            info!(consumer_group = %consumer_group, "Consumer group already exists");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let config = AxonConfig::load()?;
    let worker = worker_name(&config);
    let consumer_group = config.worker.consumer_group.clone();
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| config.redis.url.clone());

    info!(
        worker = %worker,
        consumer_group = %consumer_group,
        "Axon worker starting"
    );

    let cfg = Config::from_url(redis_url);
    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .expect("Failed to create Redis pool");

    // Assemble the router: plugins from config, Redis-backed store and DLQ
    let manager = PluginManager::new(config.plugin_configs(), Some(config.http_client()));
    manager.register_all(config.build_plugins()).await?;
    manager.init().await?;

    let store = Arc::new(RedisEventStore::new(pool.clone()));
    let dlq = Arc::new(RedisDlqSink::new(pool.clone()));
    let router = EventRouter::new(config.router.clone(), manager.clone(), store, dlq);

    ensure_consumer_group(&pool, &consumer_group)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to create consumer group");
            e
        })?;

    // Recover batches abandoned by dead workers
    {
        let mut conn = pool.get().await?;
        let claimed = claim_pending_entries(&mut conn, &consumer_group, &worker).await;
        if !claimed.is_empty() {
            process_entries(&router, &mut conn, &consumer_group, claimed).await;
        }
    }

    let shutdown = ShutdownSignal::new();
    let mut shutdown_receiver = shutdown.subscribe();

    info!(stream = %EVENT_STREAM_NAME, "Listening for events");

    let mut batches_processed: u64 = 0;

    loop {
        if shutdown_receiver.try_recv().is_ok() {
            info!("Shutdown signal received, stopping");
            break;
        }

        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Failed to get Redis connection");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let opts = StreamReadOptions::default()
            .group(&consumer_group, &worker)
            .block(READ_BLOCK_MS as usize)
            .count(router.config().batch_size);

        let result: Result<StreamReadReply, _> = tokio::select! {
            _ = shutdown.wait() => {
                info!("Shutdown signal received during read, finishing");
                break;
            }
            result = conn.xread_options(&[EVENT_STREAM_NAME], &[">"], &opts) => result,
        };

        match result {
            Ok(reply) => {
                for stream_key in reply.keys {
                    let entries: Vec<StreamEntry> = stream_key
                        .ids
                        .into_iter()
                        .map(|element| (element.id, element.map))
                        .collect();

                    if entries.is_empty() {
                        continue;
                    }

                    process_entries(&router, &mut conn, &consumer_group, entries).await;
                    batches_processed += 1;

                    if batches_processed.is_multiple_of(100) {
                        info!(batches_processed = batches_processed, "Worker statistics");
                    }
                }
            }
            Err(e) => {
                let err_str = e.to_string();
                // Timeouts and nil replies are normal when the stream is idle
                if !err_str.contains("timed out") && !err_str.contains("response was nil") {
                    warn!(error = %e, "Stream read error");
                }
            }
        }
    }

    manager.destroy().await;
    info!(
        batches_processed = batches_processed,
        "Worker shutdown complete"
    );
    Ok(())
}
