//! Subscription multiplexer client
//!
//! This module provides the main `EvmuxClient` type: many logical
//! `eth_subscribe` subscriptions kept alive over one WebSocket that is
//! transparently re-established when it drops.
//!
//! # Client Lifecycle
//!
//! 1. **Connect**: establish the socket (with retries) and start the
//!    background task
//! 2. **Use**: subscribe, attach handlers, unsubscribe
//! 3. **Reconnect** (automatic): on loss, every active subscription is
//!    re-issued on the new socket under its unchanged virtual id
//! 4. **Close**: `unsubscribe_all` tears everything down for good
//!
//! # Cloning
//!
//! `EvmuxClient` is cheaply cloneable; all clones share one connection and
//! one registry. The background task stops when `unsubscribe_all` is called
//! or the last clone (including those held by subscription handles) is
//! dropped.
//!
//! # Lock Order
//!
//! Caller paths take the outbound (sender) lock first and the registry lock
//! second, so that a subscribe request and its registry entry are created
//! atomically with respect to the reconnect pass. The registry lock is
//! never held across network I/O or while handlers run.

use crate::client_builder::ClientBuilder;
use crate::connection_state::{ConnectionManager, ConnectionState};
use crate::dispatcher::{Dispatcher, Exit};
use crate::handler::{handler_fn, EventHandler};
use crate::metrics::ClientMetrics;
use crate::registry::SubscriptionRegistry;
use crate::subscription::{Subscription, SubscriptionInfo, VirtualId};
use crate::transport::{Outbound, TransportReceiver};
use evmux_core::{EndpointConfig, Error, EventType, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Persistent `eth_subscribe` multiplexer over one WebSocket
#[derive(Clone)]
pub struct EvmuxClient {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) outbound: Outbound,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) shutdown: Arc<watch::Sender<bool>>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

impl EvmuxClient {
    /// Connect to an `eth_subscribe` endpoint with default settings
    ///
    /// Uses exponential backoff for reconnection and the default heartbeat.
    /// For anything else use [`ClientBuilder`].
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        ClientBuilder::new(url).connect().await
    }

    /// Connect to the endpoint described by `config`
    pub async fn connect_endpoint(config: &EndpointConfig) -> Result<Self> {
        ClientBuilder::from_endpoint(config)?.connect().await
    }

    /// Subscribe to `event_type`
    ///
    /// Registers the subscription, sends `eth_subscribe` if the connection
    /// is up and returns without waiting for the server's confirmation. Use
    /// [`Subscription::confirmed`] to wait for it.
    ///
    /// # Errors
    ///
    /// - `Error::Terminated` after `unsubscribe_all`
    /// - `Error::ReconnectExhausted` once the client gave up reconnecting
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use evmux_client::{EvmuxClient, EventType};
    /// use serde_json::json;
    ///
    /// # async fn example(client: EvmuxClient) -> evmux_core::Result<()> {
    /// let filter = json!({"address": "0xdAC17F958D2ee523a2206206994597C13D831ec7"});
    /// let sub = client
    ///     .subscribe(EventType::Logs, Some(filter), |log| async move {
    ///         println!("log {}", log["transactionHash"]);
    ///     })
    ///     .await?;
    /// sub.confirmed().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe<F, Fut>(
        &self,
        event_type: impl Into<EventType>,
        params: Option<Value>,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(event_type.into(), params, handler_fn(handler), false)
            .await
    }

    /// Subscribe for a single notification
    ///
    /// The first notification removes the subscription and sends
    /// `eth_unsubscribe` before `handler` runs, so the handler is invoked
    /// exactly once.
    pub async fn once<F, Fut>(
        &self,
        event_type: impl Into<EventType>,
        params: Option<Value>,
        handler: F,
    ) -> Result<Subscription>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(event_type.into(), params, handler_fn(handler), true)
            .await
    }

    #[tracing::instrument(skip_all, fields(event_type = %event_type, once = once))]
    async fn register(
        &self,
        event_type: EventType,
        params: Option<Value>,
        handler: EventHandler,
        once: bool,
    ) -> Result<Subscription> {
        let mut slot = self.outbound.lock().await;
        self.ensure_usable()?;

        let registered = self
            .registry
            .register(event_type.clone(), params.clone(), handler, once, slot.epoch())
            .await;

        match registered.request {
            Some(ref request) => {
                if let Err(e) = slot.send_request(request).await {
                    tracing::warn!(error = %e, "Subscribe not sent, will be reissued after reconnect");
                }
            }
            None => tracing::debug!("Not connected, subscribe deferred until reconnect"),
        }
        drop(slot);

        tracing::debug!(virtual_id = %registered.virtual_id, once, "Subscription registered");
        self.update_subscription_gauge().await;

        Ok(Subscription::new(
            registered.virtual_id,
            event_type,
            params,
            registered.handler_id,
            registered.status,
            self.clone(),
        ))
    }

    /// Unsubscribe by virtual id
    ///
    /// The entry is removed before the server acknowledges, so no handler
    /// runs for it after this returns. Returns `Ok(false)` if there was no
    /// such subscription.
    pub async fn unsubscribe(&self, virtual_id: &VirtualId) -> Result<bool> {
        let mut slot = self.outbound.lock().await;
        if *self.shutdown.borrow() {
            return Err(Error::Terminated);
        }

        let live = slot.epoch().is_some();
        let Some(removed) = self.registry.unregister(virtual_id, live).await else {
            return Ok(false);
        };
        if let Some(ref request) = removed.request {
            if let Err(e) = slot.send_request(request).await {
                tracing::warn!(virtual_id = %virtual_id, error = %e, "Failed to send unsubscribe");
            }
        }
        drop(slot);

        tracing::debug!(
            virtual_id = %virtual_id,
            event_type = %removed.event_type,
            "Unsubscribed"
        );
        self.update_subscription_gauge().await;
        Ok(true)
    }

    /// Unsubscribe every subscription of `event_type`, returning how many
    /// were removed
    pub async fn off(&self, event_type: impl Into<EventType>) -> Result<usize> {
        let event_type = event_type.into();
        let mut slot = self.outbound.lock().await;
        if *self.shutdown.borrow() {
            return Err(Error::Terminated);
        }

        let live = slot.epoch().is_some();
        let removed = self.registry.unregister_event(&event_type, live).await;
        let requests: Vec<_> = removed.iter().filter_map(|r| r.request.clone()).collect();
        slot.send_all(&requests).await;
        drop(slot);

        tracing::debug!(event_type = %event_type, count = removed.len(), "Removed subscriptions for topic");
        self.update_subscription_gauge().await;
        Ok(removed.len())
    }

    /// Tear down every subscription and close the connection for good
    ///
    /// Bound subscriptions are unsubscribed on the server, the background
    /// task stops and the state becomes `Closed`. Every later call on this
    /// client returns `Error::Terminated`.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let mut slot = self.outbound.lock().await;
        if *self.shutdown.borrow() {
            return Err(Error::Terminated);
        }

        let live = slot.epoch().is_some();
        let requests = self.registry.drain(live).await;
        slot.send_all(&requests).await;
        let sender = slot.detach();
        self.shutdown.send_replace(true);
        self.connection.closed();
        drop(slot);

        if let Some(sender) = sender {
            sender.close().await;
        }

        tracing::info!(unsubscribed = requests.len(), "Client closed");
        self.update_subscription_gauge().await;
        Ok(())
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver for connection state changes
    ///
    /// Lets the owner tell a transient reconnect apart from the terminal
    /// `Failed` and `Closed` states.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Check if the client is currently connected
    pub fn is_connected(&self) -> bool {
        matches!(self.connection.state(), ConnectionState::Connected)
    }

    /// Number of handlers, across all subscriptions or for one topic
    pub async fn listener_count(&self, event_type: Option<&EventType>) -> usize {
        self.registry.listener_count(event_type).await
    }

    /// Snapshot of every registered subscription in creation order
    pub async fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.registry.snapshot().await
    }

    /// Number of registered subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.registry.len().await
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        self.connection.url()
    }

    fn ensure_usable(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            return Err(Error::Terminated);
        }
        match self.connection.state() {
            ConnectionState::Closed => Err(Error::Terminated),
            ConnectionState::Failed { attempts } => Err(Error::ReconnectExhausted { attempts }),
            _ => Ok(()),
        }
    }

    async fn update_subscription_gauge(&self) {
        if let Some(ref m) = self.metrics {
            m.update_active_subscriptions(self.registry.len().await);
        }
    }
}

impl std::fmt::Debug for EvmuxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvmuxClient")
            .field("url", &self.connection.url())
            .field("state", &self.connection.state())
            .finish()
    }
}

/// Background task: runs the dispatcher on the current socket and drives
/// reconnection when it is lost
pub(crate) struct ConnectionTask {
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) outbound: Outbound,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionTask {
    pub(crate) async fn run(mut self, mut receiver: TransportReceiver) {
        loop {
            let error = match self.dispatcher.run(&mut receiver, &mut self.shutdown).await {
                Exit::Shutdown => {
                    self.teardown().await;
                    return;
                }
                Exit::ConnectionLost(error) => error,
            };

            tracing::warn!(error = %error, "Connection lost");
            if let Some(ref m) = self.metrics {
                m.record_error("connection_lost");
            }

            let (old_sender, abandoned) = {
                let mut slot = self.outbound.lock().await;
                let old_sender = slot.detach();
                (old_sender, self.registry.connection_lost().await)
            };
            if let Some(sender) = old_sender {
                sender.close().await;
            }
            self.connection.disconnected();
            if abandoned > 0 {
                tracing::debug!(abandoned, "Dropped requests pending on the lost connection");
            }

            match self.connection.establish(&mut self.shutdown, true).await {
                Ok((sender, new_receiver)) => {
                    let mut slot = self.outbound.lock().await;
                    if *self.shutdown.borrow() {
                        drop(slot);
                        sender.close().await;
                        self.teardown().await;
                        return;
                    }

                    let epoch = slot.install(sender);
                    let requests = self.registry.resubscribe_all(epoch).await;
                    slot.send_all(&requests).await;
                    drop(slot);

                    self.connection.connected().await;
                    if let Some(ref m) = self.metrics {
                        m.record_reconnection_success(requests.len());
                    }
                    tracing::info!(epoch, resubscribed = requests.len(), "Reconnected");
                    receiver = new_receiver;
                }
                Err(Error::Terminated) => {
                    self.teardown().await;
                    return;
                }
                Err(e) => {
                    let attempts = match e {
                        Error::ReconnectExhausted { attempts } => attempts,
                        _ => 0,
                    };
                    let failed = {
                        let _slot = self.outbound.lock().await;
                        self.registry.fail_all(attempts).await
                    };
                    tracing::error!(
                        attempts,
                        subscriptions = failed,
                        "Giving up on the connection; all subscriptions failed"
                    );
                    if let Some(ref m) = self.metrics {
                        m.update_active_subscriptions(0);
                    }
                    return;
                }
            }
        }
    }

    async fn teardown(&self) {
        let sender = self.outbound.lock().await.detach();
        if let Some(sender) = sender {
            sender.close().await;
        }
        self.connection.closed();
        tracing::debug!("Connection task stopped");
    }
}
