//! Impls - implementations of the ports.
//!
//! - **MemoryMessageQueue**: single-process reference queue
//!
//! Broker-backed queues (Kafka, MQTT, NATS, AMQP) live in their own crates
//! and implement the same `MessageQueue` trait.

pub mod memory;

pub use self::memory::{MemoryMessageQueue, MemoryQueueBuilder};
