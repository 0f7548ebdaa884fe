//! Configuration module for Axon.
//!
//! Loads configuration from TOML files with environment variable
//! substitution.
//!
//! # Example
//!
//! ```toml
//! [router]
//! events_table = "axon:events:records"
//! dlq_url = "axon:events:dlq"
//! batch_size = 50
//! ttl_days = 30
//!
//! [plugins.log.audit]
//! mode = "async"
//!
//! [plugins.webhook.discord]
//! url = "${DISCORD_WEBHOOK_URL}"
//! mode = "sync"
//! events = ["game.achievement"]
//! ```

use crate::http::HttpClient;
use crate::plugin::{Plugin, PluginMode};
use crate::plugins::{LogPlugin, WebhookPlugin};
use crate::router::RouterConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AxonConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,
}

/// Ingestion server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_port() -> u16 {
    3000
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

/// Worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: None,
            consumer_group: default_consumer_group(),
        }
    }
}

fn default_consumer_group() -> String {
    crate::DEFAULT_CONSUMER_GROUP.to_string()
}

/// HTTP capability configuration, shared by all plugins
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retries: default_retries(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10000
}

fn default_retries() -> u32 {
    2
}

/// Built-in plugin configuration container
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PluginsConfig {
    #[serde(default)]
    pub log: HashMap<String, LogPluginConfig>,

    #[serde(default)]
    pub webhook: HashMap<String, WebhookPluginConfig>,
}

/// Log plugin configuration, keyed by instance name
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogPluginConfig {
    #[serde(default)]
    pub prefix: Option<String>,

    #[serde(default = "default_log_mode")]
    pub mode: PluginMode,

    /// Event names this instance handles; absent means all events
    #[serde(default)]
    pub events: Option<Vec<String>>,
}

fn default_log_mode() -> PluginMode {
    PluginMode::Async
}

/// Webhook plugin configuration, keyed by instance name
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WebhookPluginConfig {
    pub url: String,

    #[serde(default = "default_webhook_mode")]
    pub mode: PluginMode,

    /// Event names this instance handles; absent means all events
    #[serde(default)]
    pub events: Option<Vec<String>>,
}

fn default_webhook_mode() -> PluginMode {
    PluginMode::Sync
}

impl AxonConfig {
    /// Build the configured set of built-in plugins.
    ///
    /// Webhooks whose URL still contains an unsubstituted `${VAR}` are
    /// skipped with a warning rather than failing the whole set.
    pub fn build_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        let mut plugins: Vec<Arc<dyn Plugin>> = Vec::new();

        for (name, config) in &self.plugins.log {
            let mut plugin = LogPlugin::new(name.clone()).with_mode(config.mode);
            if let Some(prefix) = &config.prefix {
                plugin = plugin.with_prefix(prefix.clone());
            }
            if let Some(events) = &config.events {
                plugin = plugin.with_events(events.clone());
            }
            plugins.push(Arc::new(plugin));
        }

        for (name, config) in &self.plugins.webhook {
            if config.url.contains("${") {
                warn!(
                    webhook = %name,
                    "Skipping webhook with unsubstituted URL: {}",
                    config.url
                );
                continue;
            }

            let mut plugin =
                WebhookPlugin::new(name.clone(), config.url.clone()).with_mode(config.mode);
            if let Some(events) = &config.events {
                plugin = plugin.with_events(events.clone());
            }
            plugins.push(Arc::new(plugin));
        }

        plugins
    }

    /// The manager-level per-plugin config map: each plugin's raw config
    /// section as an opaque JSON value, keyed by instance name.
    pub fn plugin_configs(&self) -> HashMap<String, Value> {
        let mut configs = HashMap::new();

        for (name, config) in &self.plugins.log {
            if let Ok(value) = serde_json::to_value(config) {
                configs.insert(name.clone(), value);
            }
        }
        for (name, config) in &self.plugins.webhook {
            if let Ok(value) = serde_json::to_value(config) {
                configs.insert(name.clone(), value);
            }
        }

        configs
    }

    /// The shared HTTP capability handed to plugin contexts.
    pub fn http_client(&self) -> HttpClient {
        HttpClient::new()
            .with_timeout(Duration::from_millis(self.http.timeout_ms))
            .with_retries(self.http.retries)
    }

    /// Load configuration from the default path or the `AXON_CONFIG`
    /// env var.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            env::var("AXON_CONFIG").unwrap_or_else(|_| "config/axon.toml".to_string());
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path. A missing file yields
    /// the defaults.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        info!(path = %path.display(), "Loading configuration");

        let content = fs::read_to_string(path)?;
        let content = substitute_env_vars(&content);

        let config: AxonConfig = toml::from_str(&content)?;
        config.validate()?;

        info!(
            log_plugins = config.plugins.log.len(),
            webhook_plugins = config.plugins.webhook.len(),
            batch_size = config.router.batch_size,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.router.events_table.is_empty() {
            return Err(ConfigError::ValidationError(
                "router.events_table must not be empty".to_string(),
            ));
        }

        if self.router.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "router.batch_size must be at least 1".to_string(),
            ));
        }

        for (name, webhook) in &self.plugins.webhook {
            if webhook.url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Webhook '{}' has empty URL",
                    name
                )));
            }

            if webhook.url.contains("${") {
                warn!(
                    webhook = %name,
                    url = %webhook.url,
                    "Webhook URL contains unsubstituted environment variable"
                );
                continue;
            }

            if !webhook.url.starts_with("http://") && !webhook.url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "Webhook '{}' URL must start with http:// or https://",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                debug!(var = %var_name, "Environment variable not set, keeping placeholder");
                caps[0].to_string()
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("AXON_TEST_VAR", "substituted_value");
        let input = "url = \"${AXON_TEST_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"substituted_value\"");
        env::remove_var("AXON_TEST_VAR");
    }

    #[test]
    fn test_env_var_not_set_keeps_placeholder() {
        let input = "url = \"${AXON_NONEXISTENT_VAR}\"";
        let output = substitute_env_vars(input);
        assert_eq!(output, "url = \"${AXON_NONEXISTENT_VAR}\"");
    }

    #[test]
    fn test_default_config() {
        let config = AxonConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.redis.url, "redis://localhost:6379");
        assert_eq!(config.router.batch_size, 50);
        assert_eq!(config.router.ttl_days, 30);
        assert!(config.router.dlq_url.is_none());
    }

    #[test]
    fn test_parse_router_section() {
        let toml = r#"
            [router]
            events_table = "prod:events"
            dlq_url = "prod:events:dlq"
            batch_size = 25
        "#;

        let config: AxonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.router.events_table, "prod:events");
        assert_eq!(config.router.dlq_url.as_deref(), Some("prod:events:dlq"));
        assert_eq!(config.router.batch_size, 25);
        // Unset fields keep their defaults
        assert_eq!(config.router.ttl_days, 30);
    }

    #[test]
    fn test_parse_plugins_and_build() {
        let toml = r#"
            [plugins.log.audit]
            prefix = "audit"
            events = ["user.created"]

            [plugins.webhook.discord]
            url = "https://discord.com/api/webhooks/test"
            mode = "async"
            events = ["game.achievement"]
        "#;

        let config: AxonConfig = toml::from_str(toml).unwrap();
        let plugins = config.build_plugins();
        assert_eq!(plugins.len(), 2);

        let configs = config.plugin_configs();
        assert_eq!(
            configs["discord"]["url"],
            "https://discord.com/api/webhooks/test"
        );
        assert_eq!(configs["audit"]["prefix"], "audit");
    }

    #[test]
    fn test_unsubstituted_webhook_is_skipped() {
        let toml = r#"
            [plugins.webhook.broken]
            url = "${AXON_UNSET_HOOK_URL}"
        "#;

        let config: AxonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.build_plugins().is_empty());
    }

    #[test]
    fn test_validation_invalid_url() {
        let toml = r#"
            [plugins.webhook.bad]
            url = "not-a-url"
        "#;

        let config: AxonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_batch_size() {
        let toml = r#"
            [router]
            batch_size = 0
        "#;

        let config: AxonConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }
}
