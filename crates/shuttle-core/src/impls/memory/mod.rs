//! MemoryMessageQueue - single-process reference implementation of the
//! queue contract.
//!
//! # Implementation notes
//! - One `tokio::sync::Mutex` guards the backlog, the lock table, the open
//!   flag and the listener registration. Logging, counters and receiver calls
//!   happen after it is released.
//! - `receive` polls the backlog every `poll_interval` instead of being woken
//!   by `send`. This keeps the engine simple at the cost of up to one poll
//!   interval of extra latency; a broker-backed queue should block on a real
//!   primitive instead.
//! - Expired locks are not swept. They are reconciled lazily: `abandon` does
//!   not requeue an expired lock, `renew_lock` ignores it. A consumer that
//!   dies without settling leaves its envelope in the lock table until
//!   `clear`.

mod builder;
mod state;

pub use self::builder::MemoryQueueBuilder;

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::app::listener::{DispatchLoop, DispatchSettings, deliver};
use crate::config::QueueConfig;
use crate::domain::{Capability, Context, MessageEnvelope, MessagingCapabilities, QueueError};
use crate::ports::{
    Clock, ConnectionParams, ConnectionResolver, CounterSink, MessageQueue, MessageReceiver,
};

use self::state::{AbandonOutcome, QueueState, RenewOutcome};

/// Upper bound for a receive wait that would overflow `Instant`.
const MAX_WAIT: Duration = Duration::from_secs(86_400 * 365);

/// Receiver installed by `listen`, plus the loop redelivering abandoned envelopes.
pub(crate) struct Listener {
    receiver: Arc<dyn MessageReceiver>,
    dispatch: DispatchLoop,
}

struct Shared {
    name: String,
    capabilities: MessagingCapabilities,
    poll_interval: Duration,
    dispatch: DispatchSettings,
    require_connection: bool,
    resolver: Arc<dyn ConnectionResolver>,
    counters: Arc<dyn CounterSink>,
    clock: Arc<dyn Clock>,
    sent_counter: String,
    received_counter: String,
    dead_counter: String,
    state: Mutex<QueueState>,
}

/// In-memory queue. Clones are handles to the same queue.
#[derive(Clone)]
pub struct MemoryMessageQueue {
    shared: Arc<Shared>,
}

impl MemoryMessageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> MemoryQueueBuilder {
        MemoryQueueBuilder::new(name)
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        Ok(MemoryQueueBuilder::from_config(config)?.build())
    }

    fn from_builder(builder: MemoryQueueBuilder) -> Self {
        let name = builder.name;
        Self {
            shared: Arc::new(Shared {
                sent_counter: format!("{name}.sent_messages"),
                received_counter: format!("{name}.received_messages"),
                dead_counter: format!("{name}.dead_messages"),
                name,
                capabilities: builder.capabilities,
                poll_interval: builder.poll_interval,
                dispatch: builder.dispatch,
                require_connection: builder.require_connection,
                resolver: builder.resolver,
                counters: builder.counters,
                clock: builder.clock,
                state: Mutex::new(QueueState::new()),
            }),
        }
    }

    /// Number of envelopes currently checked out.
    pub async fn locked_count(&self) -> usize {
        self.shared.state.lock().await.locked_len()
    }

    /// Connection resolved by the last `open`, if any.
    pub async fn connection(&self) -> Option<ConnectionParams> {
        self.shared.state.lock().await.connection.clone()
    }

    pub async fn is_listening(&self) -> bool {
        self.shared.state.lock().await.listener.is_some()
    }

    fn as_dyn(&self) -> Arc<dyn MessageQueue> {
        Arc::new(self.clone())
    }

    fn require(&self, ctx: &Context, capability: Capability) -> Result<(), QueueError> {
        if self.shared.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(QueueError::not_supported(ctx.trace_id(), &self.shared.name, capability))
        }
    }

    fn check_open(&self, ctx: &Context, state: &QueueState) -> Result<(), QueueError> {
        if state.opened {
            Ok(())
        } else {
            Err(QueueError::not_opened(ctx.trace_id(), &self.shared.name))
        }
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn capabilities(&self) -> MessagingCapabilities {
        self.shared.capabilities
    }

    async fn is_open(&self) -> bool {
        self.shared.state.lock().await.opened
    }

    async fn open(&self, ctx: &Context) -> Result<(), QueueError> {
        if self.is_open().await {
            return Ok(());
        }

        let connection = self.shared.resolver.resolve(ctx).await?;
        if connection.is_none() && self.shared.require_connection {
            return Err(QueueError::configuration(
                ctx.trace_id(),
                format!("connection for queue {} is not configured", self.shared.name),
            ));
        }

        {
            let mut state = self.shared.state.lock().await;
            if state.opened {
                return Ok(());
            }
            state.opened = true;
            state.connection = connection;
        }

        debug!(queue = %self.shared.name, trace_id = ctx.trace_id(), "opened queue");
        Ok(())
    }

    async fn close(&self, ctx: &Context) -> Result<(), QueueError> {
        let listener = {
            let mut state = self.shared.state.lock().await;
            if !state.opened {
                return Ok(());
            }
            state.opened = false;
            state.listener.take()
        };

        if let Some(listener) = listener {
            listener.dispatch.stop();
        }
        debug!(queue = %self.shared.name, trace_id = ctx.trace_id(), "closed queue");
        Ok(())
    }

    async fn message_count(&self, ctx: &Context) -> Result<usize, QueueError> {
        self.require(ctx, Capability::MessageCount)?;
        let state = self.shared.state.lock().await;
        self.check_open(ctx, &state)?;
        Ok(state.backlog_len())
    }

    async fn send(&self, ctx: &Context, mut envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.require(ctx, Capability::Send)?;
        envelope.set_sent_time(self.shared.clock.now());
        envelope.set_lock_token(None);

        let receiver = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            match &state.listener {
                Some(listener) => Some(Arc::clone(&listener.receiver)),
                None => {
                    state.push(envelope.clone());
                    None
                }
            }
        };

        self.shared.counters.increment_one(&self.shared.sent_counter);
        trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), "sent message {envelope}");

        if let Some(receiver) = receiver {
            self.shared.counters.increment_one(&self.shared.received_counter);
            trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), "pushed message {envelope} to listener");
            deliver(&receiver, envelope, self.as_dyn()).await;
        }
        Ok(())
    }

    async fn peek(&self, ctx: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.require(ctx, Capability::Peek)?;
        let head = {
            let state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.peek()
        };

        if let Some(envelope) = &head {
            trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), "peeked message {envelope}");
        }
        Ok(head)
    }

    async fn peek_batch(
        &self,
        ctx: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.require(ctx, Capability::PeekBatch)?;
        let batch = {
            let state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.peek_batch(max_messages)
        };

        trace!(queue = %self.shared.name, trace_id = ctx.trace_id(), count = batch.len(), "peeked messages");
        Ok(batch)
    }

    async fn receive(
        &self,
        ctx: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.require(ctx, Capability::Receive)?;
        let started = Instant::now();
        let deadline = started
            .checked_add(wait_timeout)
            .unwrap_or(started + MAX_WAIT);
        let mut first_attempt = true;

        loop {
            let checked_out = {
                let mut state = self.shared.state.lock().await;
                if !state.opened {
                    if first_attempt {
                        return Err(QueueError::not_opened(ctx.trace_id(), &self.shared.name));
                    }
                    // closed while waiting
                    return Ok(None);
                }
                state.pop_and_lock(self.shared.clock.now(), wait_timeout)
            };
            first_attempt = false;

            if let Some(envelope) = checked_out {
                self.shared.counters.increment_one(&self.shared.received_counter);
                trace!(
                    queue = %self.shared.name,
                    trace_id = envelope.trace_id(),
                    lock = ?envelope.lock_token(),
                    "received message {envelope}"
                );
                return Ok(Some(envelope));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let pause = self.shared.poll_interval.min(deadline - now);
            tokio::select! {
                _ = ctx.cancelled() => {
                    trace!(queue = %self.shared.name, trace_id = ctx.trace_id(), "receive cancelled");
                    return Ok(None);
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn renew_lock(
        &self,
        ctx: &Context,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.require(ctx, Capability::RenewLock)?;
        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };

        let outcome = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.renew(token, self.shared.clock.now(), lock_timeout)
        };

        match outcome {
            RenewOutcome::Renewed => {
                trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, "renewed lock of message {envelope}")
            }
            RenewOutcome::Expired | RenewOutcome::Missing => {
                trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, outcome = ?outcome, "lock not renewed for message {envelope}")
            }
        }
        Ok(())
    }

    async fn complete(
        &self,
        ctx: &Context,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };

        let removed = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.complete(token)
        };
        envelope.set_lock_token(None);

        trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, removed, "completed message {envelope}");
        Ok(())
    }

    async fn abandon(&self, ctx: &Context, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.require(ctx, Capability::Abandon)?;
        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };

        let outcome = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.abandon(token, self.shared.clock.now())
        };
        envelope.set_lock_token(None);

        match outcome {
            AbandonOutcome::Requeued => {
                trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, "abandoned message {envelope}")
            }
            AbandonOutcome::Expired | AbandonOutcome::Missing => {
                trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, outcome = ?outcome, "abandoned message {envelope} without requeue")
            }
        }
        Ok(())
    }

    async fn move_to_dead_letter(
        &self,
        ctx: &Context,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.require(ctx, Capability::DeadLetter)?;
        let Some(token) = envelope.lock_token() else {
            return Ok(());
        };

        let removed = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            state.dead_letter(token)
        };
        envelope.set_lock_token(None);

        self.shared.counters.increment_one(&self.shared.dead_counter);
        trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), lock = %token, removed, "moved message {envelope} to dead letter");
        Ok(())
    }

    async fn listen(
        &self,
        ctx: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.require(ctx, Capability::Receive)?;
        let queue = self.as_dyn();

        let (mut pending, previous) = {
            let mut state = self.shared.state.lock().await;
            self.check_open(ctx, &state)?;
            let drained = state.take_backlog();
            // the loop outlives this call; only the trace id carries over
            let dispatch = DispatchLoop::spawn(
                Arc::new(ListenerHandle::new(&self.shared)),
                Arc::clone(&receiver),
                Context::new(ctx.trace_id()),
                self.shared.dispatch,
            );
            let previous = state.listener.replace(Listener {
                receiver: Arc::clone(&receiver),
                dispatch,
            });
            (drained, previous)
        };

        if let Some(previous) = previous {
            previous.dispatch.stop();
        }
        debug!(queue = %self.shared.name, trace_id = ctx.trace_id(), backlog = pending.len(), "started listening");

        while !pending.is_empty() {
            {
                let mut state = self.shared.state.lock().await;
                if !state.listens_with(&receiver) {
                    debug!(
                        queue = %self.shared.name,
                        trace_id = ctx.trace_id(),
                        returned = pending.len(),
                        "listener replaced before backlog was delivered"
                    );
                    state.restore_backlog(std::mem::take(&mut pending));
                    break;
                }
            }
            let Some(envelope) = pending.pop_front() else {
                break;
            };
            self.shared.counters.increment_one(&self.shared.received_counter);
            trace!(queue = %self.shared.name, trace_id = envelope.trace_id(), "pushed message {envelope} to listener");
            deliver(&receiver, envelope, Arc::clone(&queue)).await;
        }
        Ok(())
    }

    async fn end_listen(&self, ctx: &Context) -> Result<(), QueueError> {
        let listener = self.shared.state.lock().await.listener.take();

        if let Some(listener) = listener {
            listener.dispatch.stop();
            debug!(queue = %self.shared.name, trace_id = ctx.trace_id(), "stopped listening");
        }
        Ok(())
    }

    async fn clear(&self, ctx: &Context) -> Result<(), QueueError> {
        self.require(ctx, Capability::Clear)?;
        let (backlog, locked) = self.shared.state.lock().await.clear();

        trace!(queue = %self.shared.name, trace_id = ctx.trace_id(), backlog, locked, "cleared queue");
        Ok(())
    }
}

/// Queue handle given to the listener loop.
///
/// Holds the queue weakly: once every user handle is dropped the listener
/// registration drops with it, which ends the loop.
struct ListenerHandle {
    name: String,
    capabilities: MessagingCapabilities,
    shared: Weak<Shared>,
}

impl ListenerHandle {
    fn new(shared: &Arc<Shared>) -> Self {
        Self {
            name: shared.name.clone(),
            capabilities: shared.capabilities,
            shared: Arc::downgrade(shared),
        }
    }

    fn queue(&self) -> Option<MemoryMessageQueue> {
        self.shared
            .upgrade()
            .map(|shared| MemoryMessageQueue { shared })
    }

    fn live(&self, ctx: &Context) -> Result<MemoryMessageQueue, QueueError> {
        self.queue()
            .ok_or_else(|| QueueError::not_opened(ctx.trace_id(), &self.name))
    }
}

#[async_trait]
impl MessageQueue for ListenerHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> MessagingCapabilities {
        self.capabilities
    }

    async fn is_open(&self) -> bool {
        match self.queue() {
            Some(queue) => queue.is_open().await,
            None => false,
        }
    }

    async fn open(&self, ctx: &Context) -> Result<(), QueueError> {
        self.live(ctx)?.open(ctx).await
    }

    async fn close(&self, ctx: &Context) -> Result<(), QueueError> {
        match self.queue() {
            Some(queue) => queue.close(ctx).await,
            None => Ok(()),
        }
    }

    async fn message_count(&self, ctx: &Context) -> Result<usize, QueueError> {
        self.live(ctx)?.message_count(ctx).await
    }

    async fn send(&self, ctx: &Context, envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.live(ctx)?.send(ctx, envelope).await
    }

    async fn peek(&self, ctx: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.live(ctx)?.peek(ctx).await
    }

    async fn peek_batch(
        &self,
        ctx: &Context,
        max_messages: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.live(ctx)?.peek_batch(ctx, max_messages).await
    }

    async fn receive(
        &self,
        ctx: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.live(ctx)?.receive(ctx, wait_timeout).await
    }

    async fn renew_lock(
        &self,
        ctx: &Context,
        envelope: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.live(ctx)?.renew_lock(ctx, envelope, lock_timeout).await
    }

    async fn complete(
        &self,
        ctx: &Context,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.live(ctx)?.complete(ctx, envelope).await
    }

    async fn abandon(&self, ctx: &Context, envelope: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.live(ctx)?.abandon(ctx, envelope).await
    }

    async fn move_to_dead_letter(
        &self,
        ctx: &Context,
        envelope: &mut MessageEnvelope,
    ) -> Result<(), QueueError> {
        self.live(ctx)?.move_to_dead_letter(ctx, envelope).await
    }

    async fn listen(
        &self,
        ctx: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.live(ctx)?.listen(ctx, receiver).await
    }

    async fn end_listen(&self, ctx: &Context) -> Result<(), QueueError> {
        match self.queue() {
            Some(queue) => queue.end_listen(ctx).await,
            None => Ok(()),
        }
    }

    async fn clear(&self, ctx: &Context) -> Result<(), QueueError> {
        self.live(ctx)?.clear(ctx).await
    }
}
