//! Per-method handler chains for server-initiated notifications.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

/// A registered notification handler.
pub type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Routes inbound notifications to handlers registered by method name.
///
/// Handlers for one method run in registration order; each is awaited before
/// the next starts. There is no removal.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    handlers: Arc<RwLock<HashMap<String, Vec<NotificationHandler>>>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the chain for `method`.
    pub fn register<F, Fut>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |params| handler(params).boxed());
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(method.to_string())
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, method: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(method)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler for `method` in order; no-op if none are registered.
    ///
    /// The lock is released before any handler runs, so a handler may
    /// register further handlers. A panicking handler is logged and the
    /// remaining handlers still run.
    pub async fn dispatch(&self, method: &str, params: Value) {
        let chain: Vec<NotificationHandler> = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            match handlers.get(method) {
                Some(chain) => chain.clone(),
                None => {
                    tracing::trace!(method, "no handlers for notification");
                    return;
                }
            }
        };

        for (index, handler) in chain.into_iter().enumerate() {
            let params = params.clone();
            let outcome = AssertUnwindSafe(async move { handler(params).await })
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                tracing::error!(
                    method,
                    handler = index,
                    panic = %panic_message(panic.as_ref()),
                    "notification handler panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
