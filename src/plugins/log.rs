//! Log plugin: structured logging of events.
//!
//! Useful for debugging event flow, audit trails, and as a harmless
//! default target during development.

use crate::event::Event;
use crate::plugin::{EventFilter, Plugin, PluginContext, PluginError, PluginMode};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::info;

/// A plugin that logs every matched event through `tracing`.
#[derive(Debug, Clone)]
pub struct LogPlugin {
    name: String,
    /// Prefix appearing in log lines, to tell instances apart
    prefix: String,
    mode: PluginMode,
    events: Option<HashSet<String>>,
}

impl LogPlugin {
    /// Create a log plugin with the given instance name; the prefix
    /// defaults to the name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            prefix: name.clone(),
            name,
            mode: PluginMode::Async,
            events: None,
        }
    }

    /// Use a custom log prefix (e.g., "audit", "debug").
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_mode(mut self, mode: PluginMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restrict to a finite set of event names; absent means all events.
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Plugin for LogPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn mode(&self) -> PluginMode {
        self.mode
    }

    fn filter(&self) -> EventFilter {
        match &self.events {
            Some(names) => EventFilter::Names(names.clone()),
            None => EventFilter::All,
        }
    }

    async fn on_event(&self, event: &Event, _ctx: &PluginContext) -> Result<(), PluginError> {
        info!(
            prefix = %self.prefix,
            source = %event.source,
            event = %event.name,
            data = %event.data,
            "[{}] Processed: {}/{}",
            self.prefix,
            event.source,
            event.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_plugin_succeeds() {
        let plugin = LogPlugin::new("audit");
        let event = Event::new("user.created", "test", json!({"user_id": 123}));
        let ctx = PluginContext::standalone(json!({}));

        plugin.on_event(&event, &ctx).await.unwrap();
        assert_eq!(plugin.name(), "audit");
        assert_eq!(plugin.mode(), PluginMode::Async);
    }

    #[test]
    fn test_event_restriction() {
        let plugin = LogPlugin::new("audit").with_events(["user.created"]);
        assert!(plugin.filter().matches("user.created"));
        assert!(!plugin.filter().matches("user.deleted"));

        let unrestricted = LogPlugin::new("all");
        assert!(unrestricted.filter().matches("anything"));
    }
}
