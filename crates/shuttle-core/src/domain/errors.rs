//! Errors - queue error taxonomy.
//!
//! Every variant carries the trace id of the call that failed so callers can
//! correlate a failure with their own logs.

use thiserror::Error;

use super::capabilities::Capability;

/// Operational classification of a [`QueueError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid connection/credential parameters.
    Configuration,
    /// Underlying transport unreachable or not open. Raised by broker
    /// adapters; the in-memory engine has no transport to lose.
    Connection,
    /// Queue not open, or operation not supported.
    InvalidState,
    /// Payload cannot be converted to/from its structured form.
    Serialization,
}

/// Why a [`QueueError::InvalidState`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateReason {
    /// The queue was used before `open` or after `close`.
    NotOpened,
    /// The queue does not advertise this capability.
    NotSupported(Capability),
    Other,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("configuration error (trace_id={trace_id}): {message}")]
    Configuration { trace_id: String, message: String },

    #[error("connection error (trace_id={trace_id}): {message}")]
    Connection { trace_id: String, message: String },

    #[error("invalid state (trace_id={trace_id}): {message}")]
    InvalidState {
        trace_id: String,
        message: String,
        reason: InvalidStateReason,
    },

    #[error("serialization error (trace_id={trace_id}): {source}")]
    Serialization {
        trace_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl QueueError {
    pub fn configuration(trace_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            trace_id: trace_id.into(),
            message: message.into(),
        }
    }

    /// Transport failure reported by a broker adapter.
    pub fn connection(trace_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            trace_id: trace_id.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(trace_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::invalid_state_because(trace_id, message, InvalidStateReason::Other)
    }

    fn invalid_state_because(
        trace_id: impl Into<String>,
        message: impl Into<String>,
        reason: InvalidStateReason,
    ) -> Self {
        Self::InvalidState {
            trace_id: trace_id.into(),
            message: message.into(),
            reason,
        }
    }

    /// The queue was used before `open` (or after `close`).
    pub fn not_opened(trace_id: impl Into<String>, queue: &str) -> Self {
        Self::invalid_state_because(
            trace_id,
            format!("queue {queue} is not opened"),
            InvalidStateReason::NotOpened,
        )
    }

    /// The queue does not advertise the capability the operation needs.
    pub fn not_supported(trace_id: impl Into<String>, queue: &str, capability: Capability) -> Self {
        Self::invalid_state_because(
            trace_id,
            format!("operation {capability} is not supported by queue {queue}"),
            InvalidStateReason::NotSupported(capability),
        )
    }

    pub fn serialization(trace_id: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            trace_id: trace_id.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Serialization { .. } => ErrorKind::Serialization,
        }
    }

    pub fn trace_id(&self) -> &str {
        match self {
            Self::Configuration { trace_id, .. }
            | Self::Connection { trace_id, .. }
            | Self::InvalidState { trace_id, .. }
            | Self::Serialization { trace_id, .. } => trace_id,
        }
    }

    pub fn invalid_state_reason(&self) -> Option<InvalidStateReason> {
        match self {
            Self::InvalidState { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Capability the failed operation needed, if that was the failure.
    pub fn unsupported_capability(&self) -> Option<Capability> {
        match self.invalid_state_reason() {
            Some(InvalidStateReason::NotSupported(capability)) => Some(capability),
            _ => None,
        }
    }

    pub fn is_not_supported(&self) -> bool {
        self.unsupported_capability().is_some()
    }

    pub fn is_not_opened(&self) -> bool {
        self.invalid_state_reason() == Some(InvalidStateReason::NotOpened)
    }
}
