//! Logical subscriptions
//!
//! A [`Subscription`] is the caller's handle on one logical subscription.
//! It is identified by a [`VirtualId`] that stays the same across
//! reconnects, while the server-assigned physical id changes every time the
//! subscription is re-issued on a new connection.
//!
//! # Status
//!
//! ```text
//!          confirmation             connection lost
//! Pending ──────────────→ Active ──────────────────→ Pending ─→ Active ...
//!    │ error response                 │ unsubscribe / once fired
//!    ↓                                ↓
//! Rejected                          Closed
//!
//! any non-terminal ──(reconnect abandoned)──→ Failed
//! ```
//!
//! Dropping a handle does not unsubscribe; the subscription keeps running
//! until [`Subscription::unsubscribe`] or `EvmuxClient::unsubscribe_all`.

use crate::client::EvmuxClient;
use crate::handler::{handler_fn, HandlerId};
use evmux_core::{Error, EventType, JsonRpcErrorData, PhysicalId, Result};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use tokio::sync::watch;
use uuid::Uuid;

/// Client-generated id of a logical subscription
///
/// A random UUID v4, stable for the lifetime of the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualId(Uuid);

impl VirtualId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VirtualId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VirtualId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a subscription is in its lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionStatus {
    /// Waiting for the server to confirm on the current connection
    Pending,
    /// Confirmed; notifications tagged with this id are delivered
    Active(PhysicalId),
    /// The server refused `eth_subscribe` (terminal)
    Rejected(JsonRpcErrorData),
    /// Unsubscribed by the caller or after a `once` delivery (terminal)
    Closed,
    /// The client gave up reconnecting (terminal)
    Failed {
        /// Connection attempts made before giving up
        attempts: u32,
    },
}

impl SubscriptionStatus {
    /// True for `Rejected`, `Closed` and `Failed`
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubscriptionStatus::Pending | SubscriptionStatus::Active(_))
    }
}

/// Point-in-time view of a registered subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    /// Virtual id
    pub id: VirtualId,
    /// Topic
    pub event_type: EventType,
    /// Filter params sent with `eth_subscribe`
    pub params: Option<Value>,
    /// Physical id on the current connection, if confirmed
    pub physical_id: Option<PhysicalId>,
    /// Number of handlers attached
    pub handler_count: usize,
    /// Whether the subscription ends after its first notification
    pub once: bool,
}

/// Handle on a logical subscription
///
/// Cheap to clone; every clone refers to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    id: VirtualId,
    event_type: EventType,
    params: Option<Value>,
    initial_handler: HandlerId,
    status: watch::Receiver<SubscriptionStatus>,
    client: EvmuxClient,
}

impl Subscription {
    pub(crate) fn new(
        id: VirtualId,
        event_type: EventType,
        params: Option<Value>,
        initial_handler: HandlerId,
        status: watch::Receiver<SubscriptionStatus>,
        client: EvmuxClient,
    ) -> Self {
        Self {
            id,
            event_type,
            params,
            initial_handler,
            status,
            client,
        }
    }

    /// Virtual id
    pub fn id(&self) -> VirtualId {
        self.id
    }

    /// Topic
    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    /// Filter params
    pub fn params(&self) -> Option<&Value> {
        self.params.as_ref()
    }

    /// Id of the handler passed to `subscribe`
    pub fn initial_handler(&self) -> HandlerId {
        self.initial_handler
    }

    /// Current status
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Physical id on the current connection, if confirmed
    pub fn physical_id(&self) -> Option<PhysicalId> {
        match &*self.status.borrow() {
            SubscriptionStatus::Active(physical_id) => Some(physical_id.clone()),
            _ => None,
        }
    }

    /// False once the subscription has ended for any reason
    pub fn is_active(&self) -> bool {
        !self.status.borrow().is_terminal()
    }

    /// Wait until the server confirms the subscription on the current
    /// connection
    ///
    /// Resolves immediately if it already is.
    ///
    /// # Errors
    ///
    /// - `Error::SubscriptionRejected` if the server refused it
    /// - `Error::Unsubscribed` if it was closed first
    /// - `Error::ReconnectExhausted` if the client gave up reconnecting
    pub async fn confirmed(&self) -> Result<PhysicalId> {
        let mut status = self.status.clone();
        let waited = status
            .wait_for(|s| !matches!(s, SubscriptionStatus::Pending))
            .await
            .map(|settled| settled.clone());
        // The sender is only dropped after a terminal status was published.
        let settled = match waited {
            Ok(settled) => settled,
            Err(_) => status.borrow().clone(),
        };

        match settled {
            SubscriptionStatus::Active(physical_id) => Ok(physical_id),
            SubscriptionStatus::Rejected(error) => Err(Error::SubscriptionRejected(error)),
            SubscriptionStatus::Closed => Err(Error::Unsubscribed),
            SubscriptionStatus::Failed { attempts } => Err(Error::ReconnectExhausted { attempts }),
            SubscriptionStatus::Pending => Err(Error::ConnectionClosed),
        }
    }

    /// Attach another handler
    ///
    /// # Errors
    ///
    /// `Error::Unsubscribed` if the subscription is no longer registered.
    pub async fn add_handler<F, Fut>(&self, handler: F) -> Result<HandlerId>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.client
            .registry
            .add_handler(&self.id, handler_fn(handler))
            .await
    }

    /// Detach a handler; the subscription stays registered even with no
    /// handlers left
    pub async fn remove_handler(&self, handler: HandlerId) -> bool {
        self.client.registry.remove_handler(&self.id, handler).await
    }

    /// Unsubscribe
    ///
    /// Returns `Ok(false)` if the subscription was already gone.
    pub async fn unsubscribe(&self) -> Result<bool> {
        self.client.unsubscribe(&self.id).await
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("params", &self.params)
            .field("status", &*self.status.borrow())
            .finish()
    }
}
