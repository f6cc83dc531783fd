use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shuttle_core::app::{DispatchLoop, DispatchSettings};
use shuttle_core::impls::MemoryQueueBuilder;
use shuttle_core::ports::InMemoryCounters;
use shuttle_core::typed::{Handler, Message, TypedRegistry};
use shuttle_core::{Context, MessageEnvelope, MessageQueue, QueueConfig, ReceiverError};

/// Runs a producer and a consumer against an in-memory queue.
#[derive(Debug, Parser)]
#[command(name = "shuttle", version)]
struct Args {
    /// Queue config (TOML). Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of messages to send.
    #[arg(short, long, default_value_t = 3)]
    messages: u32,

    /// How many times the handler fails before it starts succeeding.
    #[arg(short, long, default_value_t = 1)]
    failures: u32,

    /// Use queue.listen (push) instead of a receive-driven dispatch loop.
    /// Pushed messages carry no lock, so a failed one is not redelivered.
    #[arg(long)]
    listen: bool,

    /// Give up waiting for deliveries after this many seconds.
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Message for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

struct HelloHandler {
    remaining_failures: AtomicU32,
    done: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, message: Hello, envelope: &MessageEnvelope) -> Result<(), ReceiverError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }

        println!("Hello, {}! ({})", message.name, envelope.message_id());
        self.done.send(message.name)?;
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => QueueConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => QueueConfig::named("demo"),
    };

    // (A) queue + counters
    let counters = Arc::new(InMemoryCounters::new());
    let queue = MemoryQueueBuilder::from_config(&config)?
        .counters(counters.clone())
        .build();
    let ctx = Context::new("shuttle-cli");
    queue.open(&ctx).await?;
    info!(queue = queue.name(), capabilities = ?queue.capabilities().supported(), "queue opened");

    // (B) typed handler registry as the receiver
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut registry = TypedRegistry::new();
    registry.register::<Hello, _>(HelloHandler {
        remaining_failures: AtomicU32::new(args.failures),
        done: done_tx,
    })?;
    let registry = Arc::new(registry);

    // (C) consumer: either listen (push) or a dispatch loop over receive
    let dispatch = if args.listen {
        queue.listen(&ctx, registry.clone()).await?;
        None
    } else {
        let settings = DispatchSettings {
            receive_timeout: config.listen_timeout(),
            error_backoff: config.listen_error_backoff(),
        };
        Some(DispatchLoop::spawn(
            Arc::new(queue.clone()),
            registry.clone(),
            ctx.with_trace_id("shuttle-cli.dispatch"),
            settings,
        ))
    };

    // (D) producer
    for i in 0..args.messages {
        let envelope = MessageEnvelope::from_message(
            format!("hello-{i}"),
            &Hello {
                name: format!("shuttle #{i}"),
            },
        )?;
        queue.send(&ctx, envelope).await?;
    }

    // (E) wait for every message to be handled, a timeout, or Ctrl-C
    let wait = async {
        for _ in 0..args.messages {
            if done_rx.recv().await.is_none() {
                break;
            }
        }
    };
    tokio::select! {
        _ = wait => {}
        _ = tokio::time::sleep(Duration::from_secs(args.timeout_secs)) => {
            warn!("gave up waiting for deliveries");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    if let Some(dispatch) = dispatch {
        dispatch.stop_and_join().await;
    }

    for (name, value) in counters.snapshot() {
        println!("{name} = {value}");
    }
    let backlog = match queue.message_count(&ctx).await {
        Ok(count) => count.to_string(),
        Err(e) => format!("n/a ({e})"),
    };
    println!("backlog = {backlog}, locked = {}", queue.locked_count().await);

    queue.close(&ctx).await?;
    Ok(())
}
