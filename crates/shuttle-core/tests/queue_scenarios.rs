//! End-to-end behaviour of the in-memory queue through the public API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use shuttle_core::ports::{InMemoryCounters, ManualClock};
use shuttle_core::typed::{Handler, Message, TypedRegistry};
use shuttle_core::{
    Capability, Context, ErrorKind, MemoryMessageQueue, MessageEnvelope, MessageQueue,
    MessageReceiver, MessagingCapabilities, QueueConfig, ReceiverError,
};

async fn open_queue(name: &str) -> MemoryMessageQueue {
    let queue = MemoryMessageQueue::builder(name)
        .poll_interval(Duration::from_millis(10))
        .build();
    queue.open(&Context::new("setup")).await.unwrap();
    queue
}

fn text(payload: &str) -> MessageEnvelope {
    MessageEnvelope::new("trace", "text", payload)
}

#[tokio::test]
async fn send_then_receive_returns_payload() {
    let queue = open_queue("scenario-a").await;
    let ctx = Context::new("a");

    queue.send(&ctx, text("ABC")).await.unwrap();
    let env = queue
        .receive(&ctx, Duration::from_millis(1000))
        .await
        .unwrap()
        .expect("message within timeout");

    assert_eq!(env.payload_as_string(), "ABC");
    assert!(env.lock_token().is_some());
}

#[tokio::test]
async fn receive_on_empty_queue_waits_full_timeout() {
    let queue = open_queue("scenario-b").await;
    let start = Instant::now();

    let env = queue
        .receive(&Context::new("b"), Duration::from_millis(100))
        .await
        .unwrap();

    assert!(env.is_none());
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100), "returned early: {elapsed:?}");
}

#[tokio::test]
async fn abandon_before_expiry_redelivers_with_new_lock() {
    let queue = open_queue("scenario-c").await;
    let ctx = Context::new("c");
    queue.send(&ctx, text("X")).await.unwrap();

    let mut first = queue.receive(&ctx, Duration::from_secs(5)).await.unwrap().unwrap();
    let first_token = first.lock_token().unwrap();
    queue.abandon(&ctx, &mut first).await.unwrap();

    let second = queue.receive(&ctx, Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(second.payload_as_string(), "X");
    assert_ne!(second.lock_token().unwrap(), first_token);
}

#[tokio::test]
async fn dead_lettered_message_never_comes_back() {
    let queue = open_queue("scenario-d").await;
    let ctx = Context::new("d");
    queue.send(&ctx, text("Y")).await.unwrap();

    let mut env = queue.receive(&ctx, Duration::from_secs(1)).await.unwrap().unwrap();
    queue.move_to_dead_letter(&ctx, &mut env).await.unwrap();

    assert!(queue.receive(&ctx, Duration::from_millis(100)).await.unwrap().is_none());
}

struct Forward(mpsc::UnboundedSender<MessageEnvelope>);

#[async_trait]
impl MessageReceiver for Forward {
    async fn receive_message(
        &self,
        envelope: MessageEnvelope,
        _queue: Arc<dyn MessageQueue>,
    ) -> Result<(), ReceiverError> {
        self.0.send(envelope)?;
        Ok(())
    }
}

#[tokio::test]
async fn listener_receives_without_explicit_receive() {
    let queue = open_queue("scenario-e").await;
    let ctx = Context::new("e");
    let (tx, mut rx) = mpsc::unbounded_channel();

    queue.listen(&ctx, Arc::new(Forward(tx))).await.unwrap();
    queue.send(&ctx, text("Z")).await.unwrap();

    let env = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(env.payload_as_string(), "Z");
    queue.close(&ctx).await.unwrap();
}

#[rstest]
#[case(1)]
#[case(10)]
#[case(100)]
#[tokio::test]
async fn receive_order_equals_send_order(#[case] count: usize) {
    let queue = open_queue("fifo").await;
    let ctx = Context::new("fifo");
    for i in 0..count {
        queue.send(&ctx, text(&i.to_string())).await.unwrap();
    }

    for i in 0..count {
        let env = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(env.payload_as_string(), i.to_string());
    }
    assert!(queue.receive(&ctx, Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn unsettled_message_is_receivable_again_after_abandon() {
    // expired locks are not swept; redelivery happens through abandon while
    // the lock is still live
    let clock = Arc::new(ManualClock::default());
    let queue = MemoryMessageQueue::builder("at-least-once")
        .clock(clock.clone())
        .build();
    let ctx = Context::new("alo");
    queue.open(&ctx).await.unwrap();
    queue.send(&ctx, text("work")).await.unwrap();

    let mut env = queue.receive(&ctx, Duration::from_secs(30)).await.unwrap().unwrap();
    clock.advance(Duration::from_secs(10));
    queue.abandon(&ctx, &mut env).await.unwrap();

    let again = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(again.message_id(), env.message_id());
}

#[tokio::test]
async fn double_complete_leaves_counters_untouched() {
    let counters = Arc::new(InMemoryCounters::new());
    let queue = MemoryMessageQueue::builder("idem").counters(counters.clone()).build();
    let ctx = Context::new("idem");
    queue.open(&ctx).await.unwrap();
    queue.send(&ctx, text("once")).await.unwrap();

    let mut env = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
    queue.complete(&ctx, &mut env).await.unwrap();
    queue.complete(&ctx, &mut env).await.unwrap();

    assert_eq!(counters.get("idem.sent_messages"), 1);
    assert_eq!(counters.get("idem.received_messages"), 1);
    assert_eq!(counters.get("idem.dead_messages"), 0);
    assert_eq!(queue.locked_count().await, 0);
}

#[tokio::test]
async fn restricted_queue_from_config_rejects_unsupported_operations() {
    let config = QueueConfig::from_toml_str(
        r#"
        name = "broker-like"
        [capabilities]
        peek_batch = false
        renew_lock = false
        "#,
    )
    .unwrap();
    let queue = MemoryMessageQueue::from_config(&config).unwrap();
    let ctx = Context::new("caps");
    queue.open(&ctx).await.unwrap();
    queue.send(&ctx, text("m")).await.unwrap();

    let caps = queue.capabilities();
    assert_eq!(caps, MessagingCapabilities::all().without(Capability::PeekBatch).without(Capability::RenewLock));

    let err = queue.peek_batch(&ctx, 10).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(err.is_not_supported());

    let env = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
    let err = queue.renew_lock(&ctx, &env, Duration::from_secs(1)).await.unwrap_err();
    assert!(err.is_not_supported());
    assert_eq!(err.trace_id(), "caps");

    // supported operations still work
    assert!(queue.peek(&ctx).await.unwrap().is_none());
}

#[derive(Debug, Serialize, Deserialize)]
struct Greeting {
    name: String,
}

impl Message for Greeting {
    const TYPE: &'static str = "demo.greeting.v1";
}

struct GreetingHandler(mpsc::UnboundedSender<String>);

#[async_trait]
impl Handler<Greeting> for GreetingHandler {
    async fn handle(&self, message: Greeting, _envelope: &MessageEnvelope) -> Result<(), ReceiverError> {
        if message.name.is_empty() {
            return Err("empty name".into());
        }
        self.0.send(message.name)?;
        Ok(())
    }
}

#[tokio::test]
async fn typed_registry_dispatches_and_settles() {
    let counters = Arc::new(InMemoryCounters::new());
    let queue = MemoryMessageQueue::builder("typed")
        .counters(counters.clone())
        .poll_interval(Duration::from_millis(10))
        .build();
    let ctx = Context::new("typed");
    queue.open(&ctx).await.unwrap();

    // queued before listening so they go through receive + settlement
    queue
        .send(&ctx, MessageEnvelope::from_message("t1", &Greeting { name: "ada".into() }).unwrap())
        .await
        .unwrap();
    queue.send(&ctx, MessageEnvelope::new("t2", "demo.unknown.v1", "{}")).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = TypedRegistry::new();
    registry.register::<Greeting, _>(GreetingHandler(tx)).unwrap();
    let registry = Arc::new(registry);

    // settle through explicit receives
    let ada = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
    registry.receive_message(ada, Arc::new(queue.clone())).await.unwrap();
    assert_eq!(rx.recv().await.unwrap(), "ada");

    let unknown = queue.receive(&ctx, Duration::ZERO).await.unwrap().unwrap();
    registry.receive_message(unknown, Arc::new(queue.clone())).await.unwrap();

    assert_eq!(queue.locked_count().await, 0);
    assert_eq!(counters.get("typed.dead_messages"), 1);

    // handler failure abandons the envelope back onto the backlog
    queue
        .send(&ctx, MessageEnvelope::from_message("t3", &Greeting { name: String::new() }).unwrap())
        .await
        .unwrap();
    let empty = queue.receive(&ctx, Duration::from_secs(5)).await.unwrap().unwrap();
    let result = registry.receive_message(empty, Arc::new(queue.clone())).await;
    assert!(result.is_err());
    assert_eq!(queue.message_count(&ctx).await.unwrap(), 1);

    // and pushed through a listener
    queue.clear(&ctx).await.unwrap();
    queue.listen(&ctx, registry.clone()).await.unwrap();
    queue
        .send(&ctx, MessageEnvelope::from_message("t4", &Greeting { name: "bob".into() }).unwrap())
        .await
        .unwrap();
    let name = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(name, "bob");
    queue.end_listen(&ctx).await.unwrap();
}
