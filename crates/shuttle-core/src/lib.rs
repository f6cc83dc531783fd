//! shuttle-core
//!
//! Broker-agnostic message queue abstraction plus an in-memory reference
//! implementation.
//!
//! # Modules
//! - **domain**: envelopes, ids, capabilities, errors, operation context
//! - **ports**: `MessageQueue` / `MessageReceiver` contract, connection
//!   resolution, counters, clock
//! - **impls**: `MemoryMessageQueue`
//! - **app**: listener dispatch loop
//! - **typed**: typed messages and handler registry
//! - **config**: TOML queue configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::config::QueueConfig;
pub use crate::domain::{
    CancelHandle, Capability, Context, ErrorKind, InvalidStateReason, LockToken, MessageEnvelope,
    MessageId, MessagingCapabilities, QueueError,
};
pub use crate::impls::MemoryMessageQueue;
pub use crate::ports::{MessageQueue, MessageReceiver, ReceiverError};
