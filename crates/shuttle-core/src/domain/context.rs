//! Operation context: trace id plus cooperative cancellation.

use std::sync::Arc;
use tokio::sync::watch;

/// Per-call context passed to every queue operation.
///
/// Cloning is cheap; clones share the same cancellation signal.
#[derive(Debug, Clone)]
pub struct Context {
    trace_id: String,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] created from the same `with_cancel` call.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Context {
    /// Context that is never cancelled.
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            cancel: None,
        }
    }

    pub fn background() -> Self {
        Self::new("")
    }

    /// Cancellable context and the handle that cancels it.
    pub fn with_cancel(trace_id: impl Into<String>) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            trace_id: trace_id.into(),
            cancel: Some(rx),
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    /// Same cancellation signal, different trace id.
    pub fn with_trace_id(&self, trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the context is cancelled; pending forever otherwise.
    pub async fn cancelled(&self) {
        let Some(rx) = &self.cancel else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        let cancelled = rx.wait_for(|cancelled| *cancelled).await.is_ok();
        if !cancelled {
            // handle dropped without cancelling
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
