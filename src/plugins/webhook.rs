//! Webhook plugin: HTTP POST of events to external URLs.
//!
//! Delivery follows the plugin-mode convention: a `sync` webhook waits
//! for the response, retrying transport errors and 5xx responses through
//! the context's HTTP capability; an `async` webhook starts the request
//! and forgets it, so the async dispatch phase stays bounded in time.

use crate::event::Event;
use crate::http::HttpClient;
use crate::plugin::{EventFilter, Plugin, PluginContext, PluginError, PluginMode};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info};

/// A plugin that POSTs each matched event as JSON to a URL.
#[derive(Debug, Clone)]
pub struct WebhookPlugin {
    name: String,
    url: String,
    mode: PluginMode,
    events: Option<HashSet<String>>,
}

impl WebhookPlugin {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            mode: PluginMode::Sync,
            events: None,
        }
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

    fn client<'a>(&self, ctx: &'a PluginContext) -> Option<&'a HttpClient> {
        ctx.http.as_ref()
    }
}

#[async_trait]
impl Plugin for WebhookPlugin {
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

    async fn on_event(&self, event: &Event, ctx: &PluginContext) -> Result<(), PluginError> {
        let Some(http) = self.client(ctx) else {
            return Err(PluginError::Failed(
                "webhook plugin requires an HTTP capability".to_string(),
            ));
        };

        let payload = serde_json::to_value(event)?;

        match self.mode {
            PluginMode::Async => {
                debug!(url = %self.url, event = %event.name, "Dispatching webhook fire-and-forget");
                http.post_json_detached(self.url.clone(), payload);
                Ok(())
            }
            PluginMode::Sync => {
                let response = http.post_json(&self.url, &payload).await?;
                let status = response.status();

                if status.is_success() {
                    info!(
                        url = %self.url,
                        status = %status,
                        event = %event.name,
                        "Webhook delivered"
                    );
                    Ok(())
                } else {
                    Err(PluginError::Failed(format!(
                        "webhook returned status {status}"
                    )))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_builder() {
        let plugin = WebhookPlugin::new("discord", "https://example.com/hook")
            .with_mode(PluginMode::Async)
            .with_events(["game.achievement"]);

        assert_eq!(plugin.name(), "discord");
        assert_eq!(plugin.mode(), PluginMode::Async);
        assert!(plugin.filter().matches("game.achievement"));
        assert!(!plugin.filter().matches("user.created"));
    }

    #[tokio::test]
    async fn test_missing_http_capability_is_an_error() {
        let plugin = WebhookPlugin::new("hook", "https://example.com/hook");
        let event = Event::new("x", "s", json!({}));
        let ctx = PluginContext::standalone(json!({}));

        let err = plugin.on_event(&event, &ctx).await.unwrap_err();
        assert!(matches!(err, PluginError::Failed(_)));
    }

    #[tokio::test]
    async fn test_async_mode_returns_without_waiting() {
        // Nothing listens on the target; the detached request fails in
        // the background while the hook itself succeeds immediately.
        let plugin =
            WebhookPlugin::new("hook", "http://127.0.0.1:1/never").with_mode(PluginMode::Async);
        let event = Event::new("x", "s", json!({}));
        let mut ctx = PluginContext::standalone(json!({}));
        ctx.http = Some(HttpClient::new().with_timeout(Duration::from_millis(50)));

        plugin.on_event(&event, &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_mode_surfaces_transport_failure() {
        let plugin = WebhookPlugin::new("hook", "http://127.0.0.1:1/never");
        let event = Event::new("x", "s", json!({}));
        let mut ctx = PluginContext::standalone(json!({}));
        ctx.http = Some(
            HttpClient::new()
                .with_timeout(Duration::from_millis(50))
                .with_retries(0),
        );

        let err = plugin.on_event(&event, &ctx).await.unwrap_err();
        assert!(matches!(err, PluginError::Http(_)));
    }
}
