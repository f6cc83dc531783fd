//! MessageQueue port - the contract every queue implementation exposes.
//!
//! The in-memory engine (`impls::MemoryMessageQueue`) is the reference
//! implementation. Broker adapters implement the same trait, advertise their
//! own `MessagingCapabilities`, and may delegate `listen` to
//! `app::listener::DispatchLoop`.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Context, MessageEnvelope, MessagingCapabilities, QueueError};

/// Error type returned by receivers. The dispatch loop only logs it.
pub type ReceiverError = Box<dyn StdError + Send + Sync>;

/// Push-style consumer registered with `MessageQueue::listen`.
///
/// `queue` is the queue that delivered the envelope, so the receiver can
/// settle it (`complete` / `abandon` / `move_to_dead_letter`).
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(
        &self,
        envelope: MessageEnvelope,
        queue: Arc<dyn MessageQueue>,
    ) -> Result<(), ReceiverError>;
}

/// Queue port (interface).
///
/// State machine:
/// - lifecycle: Closed -> Open -> Closed
/// - envelope: Backlog -> Locked -> {Completed | Backlog (redelivered) | DeadLettered}
///
/// Settling an envelope whose lock lapsed or was never acquired is a silent
/// no-op, never an error.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> MessagingCapabilities;

    async fn is_open(&self) -> bool;

    /// Resolve connection parameters and open the transport. Idempotent.
    async fn open(&self, ctx: &Context) -> Result<(), QueueError>;

    /// Close the transport and end any listener. No-op when not open.
    async fn close(&self, ctx: &Context) -> Result<(), QueueError>;

    /// Number of envelopes waiting in the backlog.
    async fn message_count(&self, ctx: &Context) -> Result<usize, QueueError>;

    async fn send(&self, ctx: &Context, envelope: MessageEnvelope) -> Result<(), QueueError>;

    /// Copy of the backlog head, without locking it.
    async fn peek(&self, ctx: &Context) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Copies of up to `max_messages` envelopes from the backlog head.
    async fn peek_batch(
        &self,
        ctx: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Check out the backlog head, waiting up to `wait_timeout` for one.
    /// Returns `Ok(None)` on timeout or cancellation.
    async fn receive(
        &self,
        ctx: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError>;

    async fn renew_lock(
        &self,
        ctx: &Context,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    async fn complete(&self, ctx: &Context, envelope: &mut MessageEnvelope)
    -> Result<(), QueueError>;

    async fn abandon(&self, ctx: &Context, envelope: &mut MessageEnvelope)
    -> Result<(), QueueError>;

    async fn move_to_dead_letter(
        &self,
        ctx: &Context,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError>;

    async fn listen(
        &self,
        ctx: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError>;

    /// Stop the listener. A delivery already in flight may still finish;
    /// backlog envelopes that `listen` had not pushed yet are put back.
    async fn end_listen(&self, ctx: &Context) -> Result<(), QueueError>;

    async fn clear(&self, ctx: &Context) -> Result<(), QueueError>;
}
