//! Plugin manager: registry, lifecycle and dispatch.
//!
//! The [`PluginManager`] owns the plugin registry, coordinates
//! initialization and teardown, and dispatches events to the subset of
//! plugins that match, in parallel and with per-plugin error isolation.
//!
//! # Lifecycle
//!
//! ```text
//! register / register_all      (collect plugins, duplicate names rejected)
//!          │
//!          ▼
//!        init                  (all init hooks in parallel; any failure aborts)
//!          │
//!          ▼
//! trigger_event / trigger_replay / trigger_dlq     (any number of times)
//!          │
//!          ▼
//!        destroy               (hook failures logged, registry cleared)
//! ```
//!
//! Per-plugin hook errors never escape a trigger call: they are captured
//! into the returned [`DispatchResult`], logged, and forwarded to the
//! plugin's own `on_error` hook. The registry is treated as read-only
//! between `init` and `destroy`; concurrent trigger calls are safe.

use crate::event::Event;
use crate::http::HttpClient;
use crate::plugin::{Plugin, PluginContext, PluginError};
use futures::future::join_all;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn, Instrument};

/// Errors raised by manager operations. Per-plugin hook errors are not
/// among them; those are captured into [`DispatchResult::failures`].
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("plugin '{0}' is already registered")]
    DuplicatePlugin(String),

    #[error("plugin manager is not initialized")]
    NotInitialized,

    #[error("plugin '{plugin}' failed to initialize: {source}")]
    InitFailed {
        plugin: String,
        #[source]
        source: PluginError,
    },
}

/// A captured hook failure: which plugin, and what went wrong.
#[derive(Debug)]
pub struct PluginFailure {
    pub plugin: String,
    pub error: PluginError,
}

/// Result of dispatching one event through the matching plugins.
#[derive(Debug, Default)]
pub struct DispatchResult {
    /// Number of plugins invoked for the event
    pub plugins_invoked: usize,

    /// Hook failures, one per failed plugin, in matching order
    pub failures: Vec<PluginFailure>,
}

impl DispatchResult {
    /// True when every invoked plugin completed without error.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// The first captured failure, if any.
    pub fn first_failure(&self) -> Option<&PluginFailure> {
        self.failures.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Registered,
    Initialized,
}

#[derive(Debug, Clone, Copy)]
enum HookKind {
    Event,
    Replay,
    Dlq,
}

impl HookKind {
    fn as_str(self) -> &'static str {
        match self {
            HookKind::Event => "on_event",
            HookKind::Replay => "on_replay",
            HookKind::Dlq => "on_dlq",
        }
    }
}

/// Handle used by [`PluginContext::emit`] to re-enter the manager.
///
/// Holds only a weak reference, so emitted events after the manager is
/// gone are dropped with a warning instead of keeping it alive.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Weak<ManagerInner>,
}

impl EventEmitter {
    /// An emitter with no manager behind it; `emit` drops events.
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }

    /// Schedule a dispatch of `event` through the manager as a detached
    /// task. Errors in the emitted path are logged, never propagated.
    pub fn emit(&self, event: Event) {
        let Some(inner) = self.inner.upgrade() else {
            warn!(event = %event.key(), "Event emitted after manager shutdown, dropping");
            return;
        };

        tokio::spawn(async move {
            match inner.dispatch(HookKind::Event, &event, None).await {
                Ok(result) if !result.is_success() => {
                    debug!(
                        event = %event.key(),
                        failures = result.failure_count(),
                        "Emitted event dispatched with failures"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    error!(event = %event.key(), error = %e, "Emitted event dispatch failed");
                }
            }
        });
    }
}

struct ManagerInner {
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    /// Per-plugin opaque config, keyed by plugin name
    configs: HashMap<String, Value>,
    http: Option<HttpClient>,
    state: RwLock<ManagerState>,
}

impl ManagerInner {
    fn context_for(self: &Arc<Self>, plugin_name: &str) -> PluginContext {
        let config = self
            .configs
            .get(plugin_name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));

        PluginContext::new(
            config,
            self.http.clone(),
            EventEmitter {
                inner: Arc::downgrade(self),
            },
        )
    }

    async fn dispatch(
        self: &Arc<Self>,
        kind: HookKind,
        event: &Event,
        plugin_names: Option<&[String]>,
    ) -> Result<DispatchResult, ManagerError> {
        if *self.state.read().await != ManagerState::Initialized {
            return Err(ManagerError::NotInitialized);
        }

        let matched: Vec<Arc<dyn Plugin>> = {
            let plugins = self.plugins.read().await;
            plugins
                .iter()
                .filter(|p| {
                    let name_selected = plugin_names
                        .map_or(true, |names| names.iter().any(|n| n == p.name()));
                    name_selected && p.filter().matches(&event.name)
                })
                .cloned()
                .collect()
        };

        debug!(
            event = %event.key(),
            hook = kind.as_str(),
            matched = matched.len(),
            "Dispatching event"
        );

        let tasks = matched.iter().map(|plugin| {
            let span = tracing::info_span!(
                "plugin_hook",
                plugin = %plugin.name(),
                hook = kind.as_str(),
            );
            let ctx = self.context_for(plugin.name());
            let plugin = Arc::clone(plugin);

            async move {
                let result = match kind {
                    HookKind::Event => plugin.on_event(event, &ctx).await,
                    HookKind::Replay => plugin.on_replay(event, &ctx).await,
                    HookKind::Dlq => plugin.on_dlq(event, &ctx).await,
                };

                match result {
                    Ok(()) => None,
                    Err(err) => {
                        error!(
                            plugin = %plugin.name(),
                            event = %event.key(),
                            error = %err,
                            "Plugin hook failed"
                        );

                        if let Err(on_error_err) = plugin.on_error(&err, event, &ctx).await {
                            error!(
                                plugin = %plugin.name(),
                                error = %on_error_err,
                                "Plugin onError hook failed"
                            );
                        }

                        Some(PluginFailure {
                            plugin: plugin.name().to_string(),
                            error: err,
                        })
                    }
                }
            }
            .instrument(span)
        });

        let failures: Vec<PluginFailure> =
            join_all(tasks).await.into_iter().flatten().collect();

        Ok(DispatchResult {
            plugins_invoked: matched.len(),
            failures,
        })
    }
}

/// Registry and lifecycle controller for plugins.
///
/// Cheap to clone; clones share the registry and state.
#[derive(Clone)]
pub struct PluginManager {
    inner: Arc<ManagerInner>,
}

impl PluginManager {
    /// Create a manager with a per-plugin config map (keyed by plugin
    /// name) and an optional HTTP capability handed to every context.
    pub fn new(configs: HashMap<String, Value>, http: Option<HttpClient>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                plugins: RwLock::new(Vec::new()),
                configs,
                http,
                state: RwLock::new(ManagerState::Registered),
            }),
        }
    }

    /// Add a plugin to the registry. Fails fast on a duplicate name.
    pub async fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), ManagerError> {
        let mut plugins = self.inner.plugins.write().await;
        if plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(ManagerError::DuplicatePlugin(plugin.name().to_string()));
        }

        debug!(
            plugin = %plugin.name(),
            mode = ?plugin.mode(),
            "Registering plugin"
        );
        plugins.push(plugin);
        Ok(())
    }

    /// Register each plugin in order; the first collision aborts the
    /// remainder.
    pub async fn register_all(
        &self,
        plugins: impl IntoIterator<Item = Arc<dyn Plugin>>,
    ) -> Result<(), ManagerError> {
        for plugin in plugins {
            self.register(plugin).await?;
        }
        Ok(())
    }

    /// Run every plugin's `init` hook in parallel, returning once all
    /// complete. Any failure aborts with that error; already-initialized
    /// plugins are not rolled back. Calling `init` on an initialized
    /// manager logs a warning and does nothing.
    pub async fn init(&self) -> Result<(), ManagerError> {
        if *self.inner.state.read().await == ManagerState::Initialized {
            warn!("Plugin manager already initialized, skipping");
            return Ok(());
        }

        let plugins = self.inner.plugins.read().await.clone();

        let tasks = plugins.iter().map(|plugin| {
            let ctx = self.inner.context_for(plugin.name());
            let plugin = Arc::clone(plugin);
            async move {
                plugin
                    .init(&ctx)
                    .await
                    .map_err(|e| (plugin.name().to_string(), e))
            }
        });

        for result in join_all(tasks).await {
            if let Err((plugin, source)) = result {
                return Err(ManagerError::InitFailed { plugin, source });
            }
        }

        *self.inner.state.write().await = ManagerState::Initialized;
        info!(plugin_count = plugins.len(), "Plugin manager initialized");
        Ok(())
    }

    /// Run every plugin's `destroy` hook, clear the registry and return
    /// the manager to its pre-init state. Hook failures are logged, never
    /// raised.
    pub async fn destroy(&self) {
        let plugins = {
            let mut guard = self.inner.plugins.write().await;
            std::mem::take(&mut *guard)
        };

        let tasks = plugins.iter().map(|plugin| {
            let ctx = self.inner.context_for(plugin.name());
            let plugin = Arc::clone(plugin);
            async move {
                if let Err(e) = plugin.destroy(&ctx).await {
                    error!(plugin = %plugin.name(), error = %e, "Plugin destroy failed");
                }
            }
        });
        join_all(tasks).await;

        *self.inner.state.write().await = ManagerState::Registered;
        info!(
            plugin_count = plugins.len(),
            "Plugin manager destroyed, registry cleared"
        );
    }

    /// Invoke `on_event` on every matching plugin, concurrently.
    ///
    /// When `plugin_names` is given, only plugins named in it are
    /// considered; each candidate's event filter is then applied. Per-
    /// plugin errors are captured into the result, not raised.
    pub async fn trigger_event(
        &self,
        event: &Event,
        plugin_names: Option<&[String]>,
    ) -> Result<DispatchResult, ManagerError> {
        self.inner.dispatch(HookKind::Event, event, plugin_names).await
    }

    /// Invoke `on_replay` on every matching plugin. Plugins that do not
    /// override `on_replay` fall back to their `on_event`.
    pub async fn trigger_replay(
        &self,
        event: &Event,
        plugin_names: Option<&[String]>,
    ) -> Result<DispatchResult, ManagerError> {
        self.inner.dispatch(HookKind::Replay, event, plugin_names).await
    }

    /// Invoke `on_dlq` on every matching plugin. No fallback: plugins
    /// without dead-letter behavior are a no-op.
    pub async fn trigger_dlq(
        &self,
        event: &Event,
        plugin_names: Option<&[String]>,
    ) -> Result<DispatchResult, ManagerError> {
        self.inner.dispatch(HookKind::Dlq, event, plugin_names).await
    }

    /// Look up a plugin by name.
    pub async fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let plugins = self.inner.plugins.read().await;
        plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Snapshot of the registered plugins, in registration order.
    pub async fn plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.inner.plugins.read().await.clone()
    }

    /// Number of registered plugins.
    pub async fn plugin_count(&self) -> usize {
        self.inner.plugins.read().await.len()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(HashMap::new(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{EventFilter, PluginMode};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every hook invocation into a shared log.
    struct TestPlugin {
        name: String,
        mode: PluginMode,
        filter: EventFilter,
        fail_init: bool,
        fail_on_event: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl TestPlugin {
        fn new(name: &str, calls: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                mode: PluginMode::Async,
                filter: EventFilter::All,
                fail_init: false,
                fail_on_event: false,
                calls,
            }
        }

        fn with_filter(mut self, filter: EventFilter) -> Self {
            self.filter = filter;
            self
        }

        fn failing_on_event(mut self) -> Self {
            self.fail_on_event = true;
            self
        }

        fn failing_init(mut self) -> Self {
            self.fail_init = true;
            self
        }

        fn record(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn mode(&self) -> PluginMode {
            self.mode
        }

        fn filter(&self) -> EventFilter {
            self.filter.clone()
        }

        async fn init(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.record(format!("{}:init", self.name));
            if self.fail_init {
                return Err(PluginError::Failed("init boom".into()));
            }
            Ok(())
        }

        async fn destroy(&self, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.record(format!("{}:destroy", self.name));
            Err(PluginError::Failed("destroy always grumbles".into()))
        }

        async fn on_event(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.record(format!("{}:event:{}", self.name, event.key()));
            if self.fail_on_event {
                return Err(PluginError::Failed("event boom".into()));
            }
            Ok(())
        }

        async fn on_error(
            &self,
            error: &PluginError,
            event: &Event,
            _ctx: &PluginContext,
        ) -> Result<(), PluginError> {
            self.record(format!("{}:error:{}:{}", self.name, event.key(), error));
            Ok(())
        }
    }

    /// Overrides `on_replay` and `on_dlq` to record distinct entries.
    struct ReplayAwarePlugin {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for ReplayAwarePlugin {
        fn name(&self) -> &str {
            "replay-aware"
        }

        fn mode(&self) -> PluginMode {
            PluginMode::Sync
        }

        async fn on_event(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("event:{}", event.key()));
            Ok(())
        }

        async fn on_replay(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("replay:{}", event.key()));
            Ok(())
        }

        async fn on_dlq(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("dlq:{}", event.key()));
            Ok(())
        }
    }

    /// Emits a follow-up event from inside `on_event`.
    struct EmittingPlugin {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for EmittingPlugin {
        fn name(&self) -> &str {
            "emitter"
        }

        fn mode(&self) -> PluginMode {
            PluginMode::Async
        }

        fn filter(&self) -> EventFilter {
            EventFilter::names(["chain.start"])
        }

        async fn on_event(&self, event: &Event, ctx: &PluginContext) -> Result<(), PluginError> {
            self.calls.lock().unwrap().push(format!("emitter:{}", event.key()));
            ctx.emit(Event::new("chain.next", "emitter", json!({})));
            Ok(())
        }
    }

    /// Asserts the config handed through the context.
    struct ConfigProbePlugin {
        expected: Value,
    }

    #[async_trait]
    impl Plugin for ConfigProbePlugin {
        fn name(&self) -> &str {
            "probe"
        }

        fn mode(&self) -> PluginMode {
            PluginMode::Sync
        }

        async fn on_event(&self, _event: &Event, ctx: &PluginContext) -> Result<(), PluginError> {
            if ctx.config == self.expected {
                Ok(())
            } else {
                Err(PluginError::Failed(format!(
                    "unexpected config: {}",
                    ctx.config
                )))
            }
        }
    }

    fn calls() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn event(name: &str) -> Event {
        Event::new(name, "test", json!({}))
    }

    async fn initialized_manager(plugins: Vec<Arc<dyn Plugin>>) -> PluginManager {
        let manager = PluginManager::default();
        manager.register_all(plugins).await.unwrap();
        manager.init().await.unwrap();
        manager
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let log = calls();
        let manager = PluginManager::default();

        manager
            .register(Arc::new(TestPlugin::new("a", log.clone())))
            .await
            .unwrap();
        let err = manager
            .register(Arc::new(TestPlugin::new("a", log.clone())))
            .await
            .unwrap_err();

        assert!(matches!(err, ManagerError::DuplicatePlugin(name) if name == "a"));
        assert_eq!(manager.plugin_count().await, 1);
    }

    #[tokio::test]
    async fn test_register_all_aborts_on_first_collision() {
        let log = calls();
        let manager = PluginManager::default();
        manager
            .register(Arc::new(TestPlugin::new("a", log.clone())))
            .await
            .unwrap();

        let result = manager
            .register_all(vec![
                Arc::new(TestPlugin::new("b", log.clone())) as Arc<dyn Plugin>,
                Arc::new(TestPlugin::new("a", log.clone())),
                Arc::new(TestPlugin::new("c", log.clone())),
            ])
            .await;

        assert!(result.is_err());
        // "c" never made it in
        assert_eq!(manager.plugin_count().await, 2);
        assert!(manager.get_plugin("c").await.is_none());
    }

    #[tokio::test]
    async fn test_trigger_before_init_fails() {
        let log = calls();
        let manager = PluginManager::default();
        manager
            .register(Arc::new(TestPlugin::new("a", log.clone())))
            .await
            .unwrap();

        let err = manager.trigger_event(&event("x"), None).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotInitialized));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_propagates() {
        let log = calls();
        let manager = PluginManager::default();
        manager
            .register_all(vec![
                Arc::new(TestPlugin::new("ok", log.clone())) as Arc<dyn Plugin>,
                Arc::new(TestPlugin::new("bad", log.clone()).failing_init()),
            ])
            .await
            .unwrap();

        let err = manager.init().await.unwrap_err();
        assert!(matches!(err, ManagerError::InitFailed { plugin, .. } if plugin == "bad"));

        // Still not initialized, so triggers fail
        let err = manager.trigger_event(&event("x"), None).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotInitialized));
    }

    #[tokio::test]
    async fn test_init_is_idempotent_with_warning() {
        let log = calls();
        let manager =
            initialized_manager(vec![Arc::new(TestPlugin::new("a", log.clone()))]).await;

        manager.init().await.unwrap();

        let entries = log.lock().unwrap();
        assert_eq!(entries.iter().filter(|e| e.ends_with(":init")).count(), 1);
    }

    #[tokio::test]
    async fn test_matching_by_filter_and_name_list() {
        let log = calls();
        let manager = initialized_manager(vec![
            Arc::new(
                TestPlugin::new("orders", log.clone())
                    .with_filter(EventFilter::names(["order.created"])),
            ) as Arc<dyn Plugin>,
            Arc::new(TestPlugin::new("all", log.clone())),
            Arc::new(
                TestPlugin::new("users", log.clone())
                    .with_filter(EventFilter::names(["user.created"])),
            ),
        ])
        .await;

        // Filter match only
        let result = manager
            .trigger_event(&event("order.created"), None)
            .await
            .unwrap();
        assert_eq!(result.plugins_invoked, 2); // orders + all

        // Name list restricts further
        let only = vec!["all".to_string()];
        let result = manager
            .trigger_event(&event("order.created"), Some(&only))
            .await
            .unwrap();
        assert_eq!(result.plugins_invoked, 1);
    }

    #[tokio::test]
    async fn test_failing_plugin_does_not_block_others() {
        let log = calls();
        let manager = initialized_manager(vec![
            Arc::new(TestPlugin::new("bad", log.clone()).failing_on_event()) as Arc<dyn Plugin>,
            Arc::new(TestPlugin::new("good", log.clone())),
        ])
        .await;

        let result = manager.trigger_event(&event("x"), None).await.unwrap();

        assert_eq!(result.plugins_invoked, 2);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.first_failure().unwrap().plugin, "bad");

        let entries = log.lock().unwrap();
        assert!(entries.iter().any(|e| e == "good:event:x"));
        // on_error got the captured failure
        assert!(entries.iter().any(|e| e.starts_with("bad:error:x:")));
    }

    #[tokio::test]
    async fn test_replay_falls_back_to_on_event() {
        let log = calls();
        let aware_calls = calls();
        let manager = initialized_manager(vec![
            Arc::new(TestPlugin::new("plain", log.clone())) as Arc<dyn Plugin>,
            Arc::new(ReplayAwarePlugin {
                calls: aware_calls.clone(),
            }),
        ])
        .await;

        manager.trigger_replay(&event("x"), None).await.unwrap();

        // Plugin without on_replay behaves as under trigger_event
        assert!(log.lock().unwrap().iter().any(|e| e == "plain:event:x"));
        // Plugin with on_replay uses it
        assert_eq!(aware_calls.lock().unwrap().as_slice(), ["replay:x"]);
    }

    #[tokio::test]
    async fn test_dlq_has_no_fallback() {
        let log = calls();
        let aware_calls = calls();
        let manager = initialized_manager(vec![
            Arc::new(TestPlugin::new("plain", log.clone())) as Arc<dyn Plugin>,
            Arc::new(ReplayAwarePlugin {
                calls: aware_calls.clone(),
            }),
        ])
        .await;

        let result = manager.trigger_dlq(&event("x"), None).await.unwrap();

        assert_eq!(result.plugins_invoked, 2);
        // The plain plugin's on_event was NOT called
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(aware_calls.lock().unwrap().as_slice(), ["dlq:x"]);
    }

    #[tokio::test]
    async fn test_destroy_clears_registry_and_swallows_failures() {
        let log = calls();
        let manager =
            initialized_manager(vec![Arc::new(TestPlugin::new("a", log.clone()))]).await;

        // TestPlugin::destroy always errors; destroy never does
        manager.destroy().await;

        assert_eq!(manager.plugin_count().await, 0);
        assert!(log.lock().unwrap().iter().any(|e| e == "a:destroy"));

        let err = manager.trigger_event(&event("x"), None).await.unwrap_err();
        assert!(matches!(err, ManagerError::NotInitialized));
    }

    #[tokio::test]
    async fn test_emit_reaches_other_plugins_detached() {
        let log = calls();
        let manager = initialized_manager(vec![
            Arc::new(EmittingPlugin { calls: log.clone() }) as Arc<dyn Plugin>,
            Arc::new(
                TestPlugin::new("downstream", log.clone())
                    .with_filter(EventFilter::names(["chain.next"])),
            ),
        ])
        .await;

        manager
            .trigger_event(&event("chain.start"), None)
            .await
            .unwrap();

        // The emitted dispatch is detached; poll briefly for it to land.
        for _ in 0..50 {
            if log
                .lock()
                .unwrap()
                .iter()
                .any(|e| e == "downstream:event:chain.next")
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("emitted event never reached the downstream plugin");
    }

    #[tokio::test]
    async fn test_context_config_is_scoped_by_plugin_name() {
        let mut configs = HashMap::new();
        configs.insert("probe".to_string(), json!({"region": "eu-west-1"}));

        let manager = PluginManager::new(configs, None);
        manager
            .register(Arc::new(ConfigProbePlugin {
                expected: json!({"region": "eu-west-1"}),
            }))
            .await
            .unwrap();
        manager.init().await.unwrap();

        let result = manager.trigger_event(&event("x"), None).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failures);
    }

    #[tokio::test]
    async fn test_context_config_defaults_to_empty_object() {
        let manager = PluginManager::default();
        manager
            .register(Arc::new(ConfigProbePlugin {
                expected: json!({}),
            }))
            .await
            .unwrap();
        manager.init().await.unwrap();

        let result = manager.trigger_event(&event("x"), None).await.unwrap();
        assert!(result.is_success(), "{:?}", result.failures);
    }
}
