//! Queue configuration loaded from TOML.
//!
//! ```toml
//! name = "orders"
//! poll_interval_ms = 100
//! listen_timeout_ms = 1000
//! require_connection = true
//!
//! [capabilities]
//! renew_lock = false
//!
//! [connection]
//! uri = "memory://local"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::{MessagingCapabilities, QueueError};
use crate::ports::ConnectionParams;

pub const DEFAULT_QUEUE_NAME: &str = "default";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_LISTEN_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_LISTEN_ERROR_BACKOFF_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    /// How often an empty-backlog `receive` re-checks the backlog.
    pub poll_interval_ms: u64,
    /// Wait timeout used by each `receive` of the listener dispatch loop.
    pub listen_timeout_ms: u64,
    /// Pause of the dispatch loop after a failed `receive`.
    pub listen_error_backoff_ms: u64,
    /// Fail `open` with a configuration error when no connection resolves.
    pub require_connection: bool,
    pub capabilities: MessagingCapabilities,
    pub connection: Option<ConnectionParams>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            listen_timeout_ms: DEFAULT_LISTEN_TIMEOUT_MS,
            listen_error_backoff_ms: DEFAULT_LISTEN_ERROR_BACKOFF_MS,
            require_connection: false,
            capabilities: MessagingCapabilities::all(),
            connection: None,
        }
    }
}

impl QueueConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, QueueError> {
        let config: Self = toml::from_str(raw)
            .map_err(|e| QueueError::configuration("", format!("invalid queue config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QueueError::configuration("", format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.name.trim().is_empty() {
            return Err(QueueError::configuration("", "queue name is empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(QueueError::configuration("", "poll_interval_ms must be positive"));
        }
        if self.listen_timeout_ms == 0 {
            return Err(QueueError::configuration("", "listen_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }

    pub fn listen_error_backoff(&self) -> Duration {
        Duration::from_millis(self.listen_error_backoff_ms)
    }
}
