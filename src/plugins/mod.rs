//! Built-in plugins.
//!
//! - [`LogPlugin`]: structured logging of matched events
//! - [`WebhookPlugin`]: HTTP POST of the event to an external URL,
//!   honoring the plugin-mode delivery convention (sync waits with
//!   retries, async fires and forgets)

pub mod log;
pub mod webhook;

pub use log::LogPlugin;
pub use webhook::WebhookPlugin;
