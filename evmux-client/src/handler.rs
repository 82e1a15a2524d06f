//! Subscription handlers
//!
//! A handler is an async callback receiving the `result` member of each
//! `eth_subscription` push.
//!
//! Every subscription owns a delivery task fed by an unbounded queue. The
//! read loop only enqueues, so handlers never stall frame processing: a
//! handler may call back into the client, subscribe, and await
//! [`Subscription::confirmed`](crate::Subscription::confirmed). Within one
//! subscription, notifications reach the handlers in arrival order and the
//! handlers run one after another in registration order. A slow handler
//! delays only its own subscription.
//!
//! Notifications still queued when the subscription is unsubscribed are
//! discarded. The single notification of a `once` subscription is always
//! delivered.
//!
//! A panicking handler is caught, logged and counted; the remaining handlers
//! still run and the registry is unaffected.
//!
//! # Examples
//!
//! ```rust,no_run
//! use evmux_client::{EvmuxClient, EventType};
//!
//! # async fn example(client: &EvmuxClient) -> evmux_core::Result<()> {
//! let sub = client
//!     .subscribe(EventType::NewHeads, None, |head| async move {
//!         println!("block {}", head["number"]);
//!     })
//!     .await?;
//!
//! // A second handler on the same subscription
//! sub.add_handler(|head| async move {
//!     println!("hash {}", head["hash"]);
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::metrics::ClientMetrics;
use crate::subscription::{SubscriptionStatus, VirtualId};
use evmux_core::EventType;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Type for subscription handler functions
pub type EventHandler = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Identifies one handler within a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub(crate) u64);

/// Box an async closure into an [`EventHandler`]
pub fn handler_fn<F, Fut>(handler: F) -> EventHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| Box::pin(handler(payload)))
}

/// Run `handlers` in order with a copy of `payload`, returning how many
/// panicked
pub(crate) async fn invoke_all(handlers: &[EventHandler], payload: &Value) -> usize {
    let mut panics = 0;
    for (index, handler) in handlers.iter().enumerate() {
        let payload = payload.clone();
        let outcome = AssertUnwindSafe(async move { handler(payload).await })
            .catch_unwind()
            .await;

        if let Err(panic) = outcome {
            panics += 1;
            tracing::error!(
                handler_index = index,
                panic = %panic_message(panic.as_ref()),
                "Subscription handler panicked"
            );
        }
    }
    panics
}

/// One notification bound for a subscription's handlers
pub(crate) struct Job {
    /// Handler snapshot taken when the notification was routed
    pub(crate) handlers: Vec<EventHandler>,
    pub(crate) payload: Value,
    /// The `once` notification; delivered although the entry is closed
    pub(crate) last: bool,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

/// Sending half of a subscription's delivery task
///
/// The task exits once every clone is dropped and the queue is drained.
#[derive(Clone)]
pub(crate) struct HandlerQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl HandlerQueue {
    /// Spawn the delivery task for one subscription
    pub(crate) fn spawn(
        virtual_id: VirtualId,
        event_type: EventType,
        status: watch::Receiver<SubscriptionStatus>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(virtual_id, event_type, status, rx));
        Self { tx }
    }

    /// Queue a notification without waiting for the handlers
    pub(crate) fn push(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::debug!("Delivery task stopped, notification dropped");
        }
    }
}

async fn deliver(
    virtual_id: VirtualId,
    event_type: EventType,
    status: watch::Receiver<SubscriptionStatus>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = jobs.recv().await {
        let closed = status.borrow().is_terminal();
        if closed && !job.last {
            tracing::trace!(virtual_id = %virtual_id, "Discarding notification queued before unsubscribe");
            continue;
        }

        let panics = invoke_all(&job.handlers, &job.payload).await;
        if let Some(ref m) = job.metrics {
            for _ in 0..panics {
                m.record_handler_panic(event_type.as_str());
            }
        }
    }
    tracing::trace!(virtual_id = %virtual_id, "Delivery task finished");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
