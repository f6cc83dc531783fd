//! MemoryQueueBuilder - wiring of the in-memory queue.

use std::sync::Arc;
use std::time::Duration;

use crate::app::listener::DispatchSettings;
use crate::config::{DEFAULT_POLL_INTERVAL_MS, QueueConfig};
use crate::domain::{MessagingCapabilities, QueueError};
use crate::ports::{
    Clock, ConnectionResolver, CounterSink, NullCounters, StaticConnectionResolver, SystemClock,
};

use super::MemoryMessageQueue;

/// Builds a [`MemoryMessageQueue`].
///
/// ```ignore
/// let queue = MemoryMessageQueue::builder("orders")
///     .counters(counters.clone())
///     .poll_interval(Duration::from_millis(20))
///     .build();
/// ```
pub struct MemoryQueueBuilder {
    pub(super) name: String,
    pub(super) capabilities: MessagingCapabilities,
    pub(super) poll_interval: Duration,
    pub(super) dispatch: DispatchSettings,
    pub(super) require_connection: bool,
    pub(super) resolver: Arc<dyn ConnectionResolver>,
    pub(super) counters: Arc<dyn CounterSink>,
    pub(super) clock: Arc<dyn Clock>,
}

impl MemoryQueueBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: MessagingCapabilities::all(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            dispatch: DispatchSettings::default(),
            require_connection: false,
            resolver: Arc::new(StaticConnectionResolver::default()),
            counters: Arc::new(NullCounters),
            clock: Arc::new(SystemClock),
        }
    }

    /// Builder seeded from a validated config.
    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self::new(config.name.clone())
            .capabilities(config.capabilities)
            .poll_interval(config.poll_interval())
            .dispatch_settings(DispatchSettings {
                receive_timeout: config.listen_timeout(),
                error_backoff: config.listen_error_backoff(),
            })
            .require_connection(config.require_connection)
            .resolver(Arc::new(StaticConnectionResolver::new(
                config.connection.clone(),
            ))))
    }

    /// Restrict the advertised operations (emulates a broker-restricted adapter).
    pub fn capabilities(mut self, capabilities: MessagingCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn dispatch_settings(mut self, dispatch: DispatchSettings) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn require_connection(mut self, require: bool) -> Self {
        self.require_connection = require;
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn counters(mut self, counters: Arc<dyn CounterSink>) -> Self {
        self.counters = counters;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> MemoryMessageQueue {
        MemoryMessageQueue::from_builder(self)
    }
}
