//! Inbound frame dispatch
//!
//! The dispatcher owns the read half of the current socket and runs on the
//! client's background task until the connection is lost or the client
//! shuts down. For every text frame it:
//!
//! 1. decodes and classifies the frame (batches are split and handled item
//!    by item)
//! 2. resolves responses against the registry's correlation table
//! 3. routes `eth_subscription` pushes to the handlers of the matching
//!    logical subscription
//!
//! Notifications are handed to the subscription's delivery queue after the
//! registry lock is released; the loop never waits for a handler, so a
//! handler awaiting a confirmation cannot stall the frame that carries it.
//!
//! # Heartbeat
//!
//! When enabled, a ping is sent every `interval`. If no pong arrives within
//! `timeout` the connection is reported lost even though the socket never
//! errored, which catches half-open TCP connections.

use crate::connection_state::shutdown_requested;
use crate::handler::Job;
use crate::metrics::ClientMetrics;
use crate::registry::{Resolution, SubscriptionRegistry};
use crate::transport::{Frame, Outbound, TransportReceiver};
use evmux_core::codec::{self, InboundMessage};
use evmux_core::{Error, JsonRpcRequest, JsonRpcResponse, SubscriptionNotification};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Ping interval and pong timeout for liveness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Time between pings
    pub interval: Duration,
    /// How long to wait for the pong before giving up on the socket
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a heartbeat configuration
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Why [`Dispatcher::run`] returned
#[derive(Debug)]
pub(crate) enum Exit {
    /// Shutdown was requested
    Shutdown,
    /// The socket closed, errored or stopped answering pings
    ConnectionLost(Error),
}

pub(crate) struct Dispatcher {
    registry: SubscriptionRegistry,
    outbound: Outbound,
    metrics: Option<Arc<ClientMetrics>>,
    heartbeat: Option<HeartbeatConfig>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: SubscriptionRegistry,
        outbound: Outbound,
        metrics: Option<Arc<ClientMetrics>>,
        heartbeat: Option<HeartbeatConfig>,
    ) -> Self {
        Self {
            registry,
            outbound,
            metrics,
            heartbeat,
        }
    }

    /// Read frames from `receiver` until the connection ends or `shutdown`
    /// fires
    pub(crate) async fn run(
        &self,
        receiver: &mut TransportReceiver,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Exit {
        let mut ticker = self.heartbeat.map(|heartbeat| {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_requested(shutdown) => return Exit::Shutdown,

                frame = receiver.receive() => match frame {
                    Ok(Frame::Text(text)) => self.handle_text(&text).await,
                    Ok(Frame::Pong) => pong_deadline = None,
                    Ok(Frame::Other) => {}
                    Err(e) => return Exit::ConnectionLost(e),
                },

                _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                    if pong_deadline.is_some() =>
                {
                    tracing::warn!("No pong received before heartbeat timeout");
                    return Exit::ConnectionLost(Error::Connection(
                        "heartbeat timed out".to_string(),
                    ));
                }

                _ = next_tick(&mut ticker), if ticker.is_some() => {
                    if let (None, Some(heartbeat)) = (pong_deadline, self.heartbeat) {
                        if let Err(e) = self.outbound.lock().await.ping().await {
                            tracing::debug!(error = %e, "Failed to send ping");
                        }
                        pong_deadline = Some(Instant::now() + heartbeat.timeout);
                    }
                }
            }
        }
    }

    /// Handle one text frame
    pub(crate) async fn handle_text(&self, text: &str) {
        match codec::decode(text) {
            Ok(InboundMessage::Batch(items)) => {
                tracing::debug!(count = items.len(), "Received batch");
                for item in items {
                    match codec::decode_value(item) {
                        Ok(message) => self.handle_message(message).await,
                        Err(e) => self.malformed(&e),
                    }
                }
            }
            Ok(message) => self.handle_message(message).await,
            Err(e) => self.malformed(&e),
        }
    }

    async fn handle_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::Response(response) => self.handle_response(response).await,
            InboundMessage::Subscription(notification) => {
                self.handle_subscription(notification).await
            }
            InboundMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "Ignoring server notification");
            }
            InboundMessage::Batch(_) => {
                self.malformed(&Error::Protocol("nested batch".to_string()));
            }
        }
    }

    async fn handle_response(&self, response: JsonRpcResponse) {
        let id = response.id.clone();
        let resolution = self.registry.resolve(&id, response.into_outcome()).await;

        match resolution {
            Resolution::Bound {
                virtual_id,
                physical_id,
                displaced,
            } => {
                tracing::debug!(
                    virtual_id = %virtual_id,
                    physical_id = %physical_id,
                    "Subscription confirmed"
                );
                if let Some(displaced) = displaced {
                    tracing::warn!(
                        physical_id = %physical_id,
                        displaced = %displaced,
                        "Server reused a physical id; previous subscription unbound"
                    );
                }
            }
            Resolution::Rejected { virtual_id, error } => {
                tracing::warn!(
                    virtual_id = %virtual_id,
                    code = error.code,
                    message = %error.message,
                    "Subscription rejected by server"
                );
                if let Some(ref m) = self.metrics {
                    m.record_error("subscription_rejected");
                    m.update_active_subscriptions(self.registry.len().await);
                }
            }
            Resolution::Orphaned {
                physical_id,
                request,
            } => {
                tracing::info!(
                    physical_id = %physical_id,
                    "Confirmation arrived after unsubscribe, releasing server subscription"
                );
                self.send(&request).await;
            }
            Resolution::Unsubscribed {
                physical_id,
                acknowledged,
            } => {
                if acknowledged {
                    tracing::debug!(physical_id = %physical_id, "Unsubscribe acknowledged");
                } else {
                    tracing::warn!(physical_id = %physical_id, "Server did not acknowledge unsubscribe");
                }
            }
            Resolution::UnsubscribeFailed { physical_id, error } => {
                tracing::warn!(
                    physical_id = %physical_id,
                    code = error.code,
                    message = %error.message,
                    "Unsubscribe failed"
                );
            }
            Resolution::Malformed { virtual_id, result } => {
                tracing::warn!(
                    virtual_id = %virtual_id,
                    result = %result,
                    "Subscription confirmation is not a string id"
                );
                if let Some(ref m) = self.metrics {
                    m.record_error("protocol");
                }
            }
            Resolution::Stale { virtual_id } => {
                tracing::debug!(virtual_id = %virtual_id, "Error response for removed subscription");
            }
            Resolution::Unknown => {
                tracing::debug!(id = %id, "Response for unknown request id");
            }
        }
    }

    async fn handle_subscription(&self, notification: SubscriptionNotification) {
        let Some(delivery) = self.registry.route(&notification.subscription).await else {
            tracing::debug!(
                physical_id = %notification.subscription,
                "Dropping notification for unknown subscription"
            );
            if let Some(ref m) = self.metrics {
                m.record_dropped("unknown_subscription");
            }
            return;
        };

        if let Some(request) = delivery.unsubscribe {
            tracing::debug!(virtual_id = %delivery.virtual_id, "One-shot subscription fired");
            self.send(&request).await;
            if let Some(ref m) = self.metrics {
                m.update_active_subscriptions(self.registry.len().await);
            }
        }

        tracing::trace!(
            virtual_id = %delivery.virtual_id,
            event_type = %delivery.event_type,
            handlers = delivery.handlers.len(),
            "Routing notification"
        );
        if let Some(ref m) = self.metrics {
            m.record_notification(delivery.event_type.as_str());
        }

        delivery.queue.push(Job {
            handlers: delivery.handlers,
            payload: notification.result,
            last: delivery.last,
            metrics: self.metrics.clone(),
        });
    }

    async fn send(&self, request: &JsonRpcRequest) {
        if let Err(e) = self.outbound.lock().await.send_request(request).await {
            tracing::debug!(method = %request.method, error = %e, "Request not sent");
        }
    }

    fn malformed(&self, error: &Error) {
        tracing::warn!(error = %error, "Dropping malformed frame");
        if let Some(ref m) = self.metrics {
            m.record_error("protocol");
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
