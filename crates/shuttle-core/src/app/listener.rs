//! Listener dispatch loop.
//!
//! Decouples push-style receivers from the pull-style `receive` of a queue:
//! a background task keeps calling `receive` with a short timeout and hands
//! each envelope to the registered receiver.
//!
//! Receivers run in their own task so that an error or a panic is caught at
//! the call boundary and logged; neither stops the loop.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::config::{DEFAULT_LISTEN_ERROR_BACKOFF_MS, DEFAULT_LISTEN_TIMEOUT_MS};
use crate::domain::{Context, MessageEnvelope};
use crate::ports::{MessageQueue, MessageReceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Wait timeout of each `receive` call.
    pub receive_timeout: Duration,
    /// Pause after a failed `receive` before trying again.
    pub error_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(DEFAULT_LISTEN_TIMEOUT_MS),
            error_backoff: Duration::from_millis(DEFAULT_LISTEN_ERROR_BACKOFF_MS),
        }
    }
}

/// Outcome of one receiver invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Handled,
    Failed,
    Panicked,
}

/// Handle of a running dispatch loop.
///
/// - `stop()` asks the loop to exit; no new dispatch starts afterwards.
/// - `stop_and_join()` also waits for the task to finish.
pub struct DispatchLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl DispatchLoop {
    pub fn spawn(
        queue: Arc<dyn MessageQueue>,
        receiver: Arc<dyn MessageReceiver>,
        ctx: Context,
        settings: DispatchSettings,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(queue, receiver, ctx, settings, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn stop(&self) {
        // ignore: the loop may already be gone
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn stop_and_join(self) {
        self.stop();
        if let Err(e) = self.join.await {
            error!(error = %e, "dispatch loop task failed");
        }
    }
}

/// Hand one envelope to `receiver`, isolating the caller from its failures.
pub async fn deliver(
    receiver: &Arc<dyn MessageReceiver>,
    envelope: MessageEnvelope,
    queue: Arc<dyn MessageQueue>,
) -> Delivery {
    let queue_name = queue.name().to_string();
    let trace_id = envelope.trace_id().to_string();
    let message_id = envelope.message_id();
    let receiver = Arc::clone(receiver);

    let handle = tokio::spawn(async move { receiver.receive_message(envelope, queue).await });
    match handle.await {
        Ok(Ok(())) => Delivery::Handled,
        Ok(Err(e)) => {
            error!(
                queue = %queue_name,
                trace_id = %trace_id,
                message_id = %message_id,
                error = %e,
                "message receiver failed"
            );
            Delivery::Failed
        }
        Err(e) if e.is_panic() => {
            error!(
                queue = %queue_name,
                trace_id = %trace_id,
                message_id = %message_id,
                panic = %panic_message(e.into_panic()),
                "message receiver panicked"
            );
            Delivery::Panicked
        }
        Err(e) => {
            warn!(queue = %queue_name, message_id = %message_id, error = %e, "message receiver cancelled");
            Delivery::Failed
        }
    }
}

async fn run(
    queue: Arc<dyn MessageQueue>,
    receiver: Arc<dyn MessageReceiver>,
    ctx: Context,
    settings: DispatchSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(queue = queue.name(), "dispatch loop started");

    loop {
        if *shutdown_rx.borrow() || ctx.is_cancelled() {
            break;
        }

        // receive may wait; race it with shutdown and cancellation
        let received = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = ctx.cancelled() => break,
            received = queue.receive(&ctx, settings.receive_timeout) => received,
        };

        match received {
            Ok(Some(mut envelope)) => {
                if *shutdown_rx.borrow() {
                    // stopped while checking out: give it back instead of dropping it
                    trace!(queue = queue.name(), message_id = %envelope.message_id(), "returning message after stop");
                    if let Err(e) = queue.abandon(&ctx, &mut envelope).await {
                        warn!(queue = queue.name(), error = %e, "cannot return message after stop");
                    }
                    break;
                }
                deliver(&receiver, envelope, Arc::clone(&queue)).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(queue = queue.name(), error = %e, "receive failed in dispatch loop");
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = ctx.cancelled() => {}
                    _ = tokio::time::sleep(settings.error_backoff) => {}
                }
            }
        }
    }

    debug!(queue = queue.name(), "dispatch loop stopped");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryMessageQueue;
    use crate::ports::ReceiverError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Completes every envelope; fails on payload "fail", panics on "panic".
    struct Settling {
        calls: AtomicUsize,
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl MessageReceiver for Settling {
        async fn receive_message(
            &self,
            mut envelope: MessageEnvelope,
            queue: Arc<dyn MessageQueue>,
        ) -> Result<(), ReceiverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            queue.complete(&Context::background(), &mut envelope).await?;
            let payload = envelope.payload_as_string();
            let _ = self.tx.send(payload.clone());
            match payload.as_str() {
                "fail" => Err("refused".into()),
                "panic" => panic!("receiver panicked"),
                _ => Ok(()),
            }
        }
    }

    fn settings() -> DispatchSettings {
        DispatchSettings {
            receive_timeout: Duration::from_millis(50),
            error_backoff: Duration::from_millis(10),
        }
    }

    async fn queue() -> MemoryMessageQueue {
        let queue = MemoryMessageQueue::builder("loop")
            .poll_interval(Duration::from_millis(5))
            .build();
        queue.open(&Context::background()).await.unwrap();
        queue
    }

    #[tokio::test]
    async fn loop_survives_failing_and_panicking_receivers() {
        let queue = queue().await;
        let ctx = Context::background();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Settling {
            calls: AtomicUsize::new(0),
            tx,
        });

        let dispatch = DispatchLoop::spawn(Arc::new(queue.clone()), receiver.clone(), ctx.clone(), settings());
        for payload in ["fail", "panic", "ok"] {
            queue.send(&ctx, MessageEnvelope::new("", "t", payload)).await.unwrap();
        }

        for expected in ["fail", "panic", "ok"] {
            let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, expected);
        }
        assert!(!dispatch.is_finished());
        assert_eq!(queue.locked_count().await, 0);
        dispatch.stop_and_join().await;
    }

    #[tokio::test]
    async fn no_dispatch_after_stop() {
        let queue = queue().await;
        let ctx = Context::background();
        let (tx, _rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Settling {
            calls: AtomicUsize::new(0),
            tx,
        });

        let dispatch = DispatchLoop::spawn(Arc::new(queue.clone()), receiver.clone(), ctx.clone(), settings());
        dispatch.stop_and_join().await;
        queue.send(&ctx, MessageEnvelope::new("", "t", "late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(receiver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(queue.message_count(&ctx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_ends_loop() {
        let queue = queue().await;
        let (ctx, cancel) = Context::with_cancel("t-loop");
        let (tx, _rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Settling {
            calls: AtomicUsize::new(0),
            tx,
        });

        let dispatch = DispatchLoop::spawn(Arc::new(queue), receiver, ctx, settings());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), dispatch.stop_and_join())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn receive_errors_are_retried_not_fatal() {
        // never opened: every receive fails
        let queue = MemoryMessageQueue::new("closed");
        let (tx, _rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(Settling {
            calls: AtomicUsize::new(0),
            tx,
        });

        let dispatch = DispatchLoop::spawn(Arc::new(queue), receiver, Context::background(), settings());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!dispatch.is_finished());
        dispatch.stop_and_join().await;
    }

    #[tokio::test]
    async fn deliver_reports_outcome() {
        let queue = queue().await;
        let (tx, _rx) = mpsc::unbounded_channel();
        let receiver: Arc<dyn MessageReceiver> = Arc::new(Settling {
            calls: AtomicUsize::new(0),
            tx,
        });
        let dyn_queue: Arc<dyn MessageQueue> = Arc::new(queue);

        let ok = deliver(&receiver, MessageEnvelope::new("", "t", "ok"), dyn_queue.clone()).await;
        let failed = deliver(&receiver, MessageEnvelope::new("", "t", "fail"), dyn_queue.clone()).await;
        let panicked = deliver(&receiver, MessageEnvelope::new("", "t", "panic"), dyn_queue).await;

        assert_eq!(ok, Delivery::Handled);
        assert_eq!(failed, Delivery::Failed);
        assert_eq!(panicked, Delivery::Panicked);
    }
}
