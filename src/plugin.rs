//! Plugin contract for Axon.
//!
//! A plugin is a registered unit of behavior with optional lifecycle and
//! dispatch hooks. The [`Plugin`] trait defines the interface; hooks a
//! plugin does not care about keep their default bodies.
//!
//! ## Hooks
//!
//! - `init` / `destroy`: lifecycle, run by [`PluginManager`]
//! - `on_event`: normal dispatch
//! - `on_replay`: replay dispatch; the default delegates to `on_event`,
//!   so a plugin that does not override it behaves identically under
//!   replay and normal dispatch
//! - `on_dlq`: dead-letter dispatch; no fallback, the default is a no-op
//! - `on_error`: called with the captured error after any other hook of
//!   this plugin fails
//!
//! ## Creating a plugin
//!
//! ```rust,ignore
//! use axon::{Event, Plugin, PluginContext, PluginError, PluginMode};
//! use async_trait::async_trait;
//!
//! struct AuditPlugin;
//!
//! #[async_trait]
//! impl Plugin for AuditPlugin {
//!     fn name(&self) -> &str {
//!         "audit"
//!     }
//!
//!     fn mode(&self) -> PluginMode {
//!         PluginMode::Async
//!     }
//!
//!     async fn on_event(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
//!         // Your logic here
//!         Ok(())
//!     }
//! }
//! ```
//!
//! [`PluginManager`]: crate::manager::PluginManager

use crate::event::Event;
use crate::http::{HttpClient, HttpError};
use crate::manager::EventEmitter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur inside a plugin hook.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The hook timed out
    #[error("plugin timed out after {0}ms")]
    Timeout(u64),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic hook failure
    #[error("plugin failed: {0}")]
    Failed(String),
}

impl From<HttpError> for PluginError {
    fn from(err: HttpError) -> Self {
        match err {
            HttpError::Transport(e) => PluginError::Http(e),
            HttpError::ServerError(status) => {
                PluginError::Failed(format!("server returned status {status}"))
            }
        }
    }
}

/// Dispatch discipline of a plugin.
///
/// `Async` does not mean the router leaves the plugin running in the
/// background: both phases of batch processing wait for every invoked hook
/// to return. The mode describes the plugin's own side-effect discipline.
/// An `Async` plugin fires its external calls (HTTP) without waiting for a
/// response; a `Sync` plugin waits for them with retries. All `Async`
/// plugins for a batch run to completion before any `Sync` plugin starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginMode {
    /// Fire-and-forget side effects; dispatched in Phase A
    Async,
    /// Blocking side effects with retries; dispatched in Phase B
    Sync,
}

/// Where a `Sync` plugin executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// In-process, inside the batch pipeline (the default)
    #[default]
    Inline,
    /// Dispatched to a separate worker process. Declared but not
    /// implemented; the router logs a warning and skips these invocations.
    Worker,
}

/// Informational plugin metadata.
#[derive(Debug, Clone, Default)]
pub struct PluginMetadata {
    pub version: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub execution_strategy: ExecutionStrategy,
    /// Duration hint in milliseconds; informational only
    pub estimated_duration_ms: Option<u64>,
}

/// Which events a plugin handles, evaluated against the event name.
#[derive(Clone)]
pub enum EventFilter {
    /// Matches every event
    All,
    /// Matches a finite set of event names
    Names(HashSet<String>),
    /// Matches names the predicate accepts
    Pred(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl EventFilter {
    /// Build a `Names` filter from anything iterable over name-likes.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EventFilter::Names(names.into_iter().map(Into::into).collect())
    }

    /// Whether an event with the given name passes this filter.
    pub fn matches(&self, event_name: &str) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Names(names) => names.contains(event_name),
            EventFilter::Pred(pred) => pred(event_name),
        }
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventFilter::All => write!(f, "All"),
            EventFilter::Names(names) => f.debug_tuple("Names").field(names).finish(),
            EventFilter::Pred(_) => write!(f, "Pred(..)"),
        }
    }
}

/// Per-invocation context handed to every plugin hook.
///
/// Each hook invocation receives a fresh context. Logging happens through
/// `tracing`; the manager wraps every hook in a span carrying the plugin
/// name, so plain `info!`/`warn!` calls inside hooks come out attributed.
#[derive(Clone)]
pub struct PluginContext {
    /// Opaque configuration scoped to this plugin's name; the empty object
    /// when the manager has no entry for the plugin
    pub config: Value,

    /// Retrying HTTP capability, when the manager was built with one
    pub http: Option<HttpClient>,

    emitter: EventEmitter,
}

impl PluginContext {
    /// A context with the given config, no HTTP capability and a detached
    /// emitter. Useful for exercising plugins outside a manager.
    pub fn standalone(config: Value) -> Self {
        Self {
            config,
            http: None,
            emitter: EventEmitter::detached(),
        }
    }

    pub(crate) fn new(config: Value, http: Option<HttpClient>, emitter: EventEmitter) -> Self {
        Self {
            config,
            http,
            emitter,
        }
    }

    /// Enqueue a new event for asynchronous dispatch through the same
    /// manager. Fire-and-forget: the caller does not wait, and errors in
    /// the emitted path are logged, never propagated.
    pub fn emit(&self, event: Event) {
        self.emitter.emit(event);
    }
}

/// A registered unit of behavior.
///
/// `name` must be unique within a manager. Hooks are invoked only between
/// a successful `init` and the start of `destroy`, and must be safe under
/// concurrent invocation: the manager dispatches the same plugin on
/// different events in parallel.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name, used in logs, config lookup and error reports.
    fn name(&self) -> &str;

    /// Dispatch discipline; see [`PluginMode`].
    fn mode(&self) -> PluginMode;

    /// Which events this plugin handles. Defaults to all events.
    fn filter(&self) -> EventFilter {
        EventFilter::All
    }

    /// Informational metadata; also carries the execution strategy for
    /// `Sync` plugins.
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::default()
    }

    /// One-time setup, run in parallel with every other plugin's `init`.
    async fn init(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Teardown during manager shutdown. Failures are logged, never raised.
    async fn destroy(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Normal dispatch.
    async fn on_event(&self, _event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Replay dispatch. The default delegates to [`Plugin::on_event`], so
    /// plugins without replay-specific behavior replay exactly as they
    /// dispatch.
    async fn on_replay(&self, event: &Event, ctx: &PluginContext) -> Result<(), PluginError> {
        self.on_event(event, ctx).await
    }

    /// Dead-letter dispatch. No fallback: the default does nothing.
    async fn on_dlq(&self, _event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Called with the captured error after another hook of this plugin
    /// fails. Errors raised here are logged and swallowed by the manager.
    async fn on_error(
        &self,
        _error: &PluginError,
        _event: &Event,
        _ctx: &PluginContext,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}
