//! Connection state and the reconnection controller
//!
//! # Connection States
//!
//! - **Disconnected**: initial state, and the state right after a drop
//! - **Connecting { attempt }**: a connect is in flight; `attempt` counts the
//!   failures since the last success
//! - **Connected**: the socket is up and the resubscribe pass has been sent
//! - **Failed { attempts }**: the strategy gave up (terminal)
//! - **Closed**: torn down by `unsubscribe_all` (terminal)
//!
//! # State Transitions
//!
//! ```text
//! Disconnected → Connecting{0} → Connected → Disconnected → Connecting{0} → ...
//!                     ↓ error
//!                Connecting{n} ──(strategy gives up)──→ Failed
//!
//! any state ──(unsubscribe_all)──→ Closed
//! ```
//!
//! Terminal states are sticky: once `Failed` or `Closed` is published, later
//! transitions are ignored.
//!
//! The state lives in a `tokio::sync::watch` channel so owners can await
//! changes and tell a transient reconnect apart from a terminal failure.

use crate::metrics::ClientMetrics;
use crate::reconnect::ReconnectionStrategy;
use crate::transport::{self, TransportReceiver, TransportSender};
use evmux_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting {
        /// Failed attempts since the last successful connection
        attempt: u32,
    },
    /// Connected and resubscribed
    Connected,
    /// Reconnection abandoned
    Failed {
        /// Connection attempts made before giving up
        attempts: u32,
    },
    /// Closed by the owner
    Closed,
}

impl ConnectionState {
    /// True for `Failed` and `Closed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed { .. } | ConnectionState::Closed)
    }
}

/// Owns the connection state and drives connection establishment
pub struct ConnectionManager {
    state: watch::Sender<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    url: String,
    metrics: Option<Arc<ClientMetrics>>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state
    pub fn new(
        url: impl Into<String>,
        strategy: Box<dyn ReconnectionStrategy>,
        metrics: Option<Arc<ClientMetrics>>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            strategy: Mutex::new(strategy),
            url: url.into(),
            metrics,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn set_state(&self, new_state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == new_state {
                return false;
            }
            *current = new_state.clone();
            true
        });

        if changed {
            tracing::debug!(state = ?new_state, "Connection state changed");
            if let Some(ref m) = self.metrics {
                m.update_connection_state(&new_state);
            }
        }
    }

    /// Mark the connection usable and reset the strategy
    pub async fn connected(&self) {
        self.strategy.lock().await.reset();
        self.set_state(ConnectionState::Connected);
    }

    /// Mark the connection lost
    pub fn disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    /// Mark the client torn down
    pub fn closed(&self) {
        self.set_state(ConnectionState::Closed);
    }

    /// Connect, retrying per the strategy
    ///
    /// Publishes `Connecting { attempt }` before every attempt and sleeps
    /// between failures for the delay the strategy returns. Does not publish
    /// `Connected`; the caller does that once the new sender is installed.
    ///
    /// # Errors
    ///
    /// - `Error::ReconnectExhausted` once the strategy gives up (state
    ///   becomes `Failed`)
    /// - `Error::Terminated` if `shutdown` fires or its sender is dropped
    pub async fn establish(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        reconnecting: bool,
    ) -> Result<(TransportSender, TransportReceiver)> {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return Err(Error::Terminated);
            }

            self.set_state(ConnectionState::Connecting { attempt });
            if reconnecting || attempt > 0 {
                if let Some(ref m) = self.metrics {
                    m.record_reconnection_attempt();
                }
            }

            let result = tokio::select! {
                result = transport::connect(&self.url) => result,
                _ = shutdown_requested(shutdown) => return Err(Error::Terminated),
            };

            let error = match result {
                Ok(pair) => {
                    tracing::info!(url = %self.url, attempt, "Connected");
                    return Ok(pair);
                }
                Err(e) => e,
            };

            let delay = self.strategy.lock().await.next_delay(attempt);
            attempt += 1;

            if let Some(ref m) = self.metrics {
                m.record_error("connection");
            }

            match delay {
                Some(delay) => {
                    tracing::warn!(
                        url = %self.url,
                        attempt,
                        error = %error,
                        delay_secs = delay.as_secs_f64(),
                        "Connection attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(shutdown) => return Err(Error::Terminated),
                    }
                }
                None => {
                    tracing::error!(
                        url = %self.url,
                        attempts = attempt,
                        error = %error,
                        "Reconnection abandoned (max attempts reached)"
                    );
                    self.set_state(ConnectionState::Failed { attempts: attempt });
                    return Err(Error::ReconnectExhausted { attempts: attempt });
                }
            }
        }
    }
}

/// Resolves once shutdown is requested or every sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{FixedDelay, NoReconnect};
    use std::time::Duration;

    async fn refused_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_connection_state_transitions() {
        let manager = ConnectionManager::new("ws://localhost:8546", Box::new(NoReconnect), None);
        let mut rx = manager.subscribe_state();

        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.connected().await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);

        manager.disconnected();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let manager = ConnectionManager::new("ws://localhost:8546", Box::new(NoReconnect), None);

        manager.closed();
        manager.connected().await;
        manager.disconnected();

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.state().is_terminal());
    }

    #[tokio::test]
    async fn test_establish_exhausts_strategy() {
        let strategy = FixedDelay::new(Duration::from_millis(5)).with_max_attempts(2);
        let manager = ConnectionManager::new(refused_url().await, Box::new(strategy), None);
        let (_tx, mut shutdown) = watch::channel(false);

        let result = manager.establish(&mut shutdown, false).await;

        // One initial attempt plus two retries
        assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 3 })));
        assert_eq!(manager.state(), ConnectionState::Failed { attempts: 3 });
    }

    #[tokio::test]
    async fn test_establish_no_reconnect() {
        let manager = ConnectionManager::new(refused_url().await, Box::new(NoReconnect), None);
        let (_tx, mut shutdown) = watch::channel(false);

        let result = manager.establish(&mut shutdown, false).await;
        assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 1 })));
    }

    #[tokio::test]
    async fn test_establish_stops_on_shutdown() {
        let strategy = FixedDelay::new(Duration::from_secs(60));
        let manager = Arc::new(ConnectionManager::new(
            refused_url().await,
            Box::new(strategy),
            None,
        ));
        let (tx, mut shutdown) = watch::channel(false);

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.establish(&mut shutdown, true).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Terminated)));
        assert_eq!(manager.state(), ConnectionState::Connecting { attempt: 0 });
    }
}
