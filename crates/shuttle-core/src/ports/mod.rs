//! Ports - abstraction layer.
//!
//! Each trait is a seam towards something outside the queue engine:
//! the queue contract itself, connection resolution, counters and time.

pub mod clock;
pub mod connection;
pub mod counters;
pub mod message_queue;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::connection::{
    ConnectionParams, ConnectionResolver, CredentialParams, StaticConnectionResolver,
};
pub use self::counters::{CounterSink, InMemoryCounters, NullCounters};
pub use self::message_queue::{MessageQueue, MessageReceiver, ReceiverError};
