//! Client builder for configuring reconnection and other options
//!
//! The `ClientBuilder` provides a fluent API for configuring client behavior
//! before connecting. It allows you to:
//! - Pick the endpoint by URL or through an [`EndpointConfig`]
//! - Choose the reconnection strategy (exponential backoff by default)
//! - Tune or disable the ping/pong heartbeat
//! - Configure observability (OpenTelemetry)
//!
//! # Examples
//!
//! ```rust,no_run
//! use evmux_client::{ClientBuilder, ExponentialBackoff};
//! use evmux_core::{EndpointConfig, Network};
//! use std::time::Duration;
//!
//! # async fn example() -> evmux_core::Result<()> {
//! // Explicit URL and strategy
//! let client = ClientBuilder::new("wss://eth-mainnet.g.alchemy.com/v2/demo")
//!     .with_reconnect(Box::new(
//!         ExponentialBackoff::new(Duration::from_millis(500), Duration::from_secs(30))
//!             .with_max_attempts(20),
//!     ))
//!     .connect()
//!     .await?;
//!
//! // Hosted endpoint with observability
//! let config = EndpointConfig::new("my-key").with_network(Network::ArbMainnet);
//! let client2 = ClientBuilder::from_endpoint(&config)?
//!     .with_default_observability()
//!     .service_name("arb-indexer")
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::client::{ConnectionTask, EvmuxClient};
use crate::connection_state::ConnectionManager;
use crate::dispatcher::{Dispatcher, HeartbeatConfig};
use crate::metrics::ClientMetrics;
use crate::reconnect::{ExponentialBackoff, NoReconnect, ReconnectionStrategy};
use crate::registry::SubscriptionRegistry;
use crate::transport::Outbound;
use evmux_core::{EndpointConfig, Error, ObservabilityConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Builder for configuring and creating an [`EvmuxClient`]
pub struct ClientBuilder {
    url: String,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    heartbeat: Option<HeartbeatConfig>,
    observability_config: Option<ObservabilityConfig>,
    service_name: Option<String>,
}

impl ClientBuilder {
    /// Create a new client builder
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_strategy: None,
            heartbeat: Some(HeartbeatConfig::default()),
            observability_config: None,
            service_name: None,
        }
    }

    /// Create a builder for a hosted endpoint
    ///
    /// # Errors
    ///
    /// `Error::InvalidConfig` if the config does not describe a WebSocket URL.
    pub fn from_endpoint(config: &EndpointConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config.ws_url()))
    }

    /// Reconnect with the given strategy
    pub fn with_reconnect(mut self, strategy: Box<dyn ReconnectionStrategy>) -> Self {
        self.reconnect_strategy = Some(strategy);
        self
    }

    /// Reconnect with default exponential backoff (the default)
    pub fn with_default_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(ExponentialBackoff::default()));
        self
    }

    /// Never reconnect: the first failure is terminal
    pub fn without_reconnect(mut self) -> Self {
        self.reconnect_strategy = Some(Box::new(NoReconnect));
        self
    }

    /// Ping every `interval` and give up on the socket if no pong arrives
    /// within `timeout`
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat = Some(HeartbeatConfig::new(interval, timeout));
        self
    }

    /// Rely on socket errors alone to detect a dead connection
    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }

    /// Enable OpenTelemetry observability with custom configuration
    pub fn with_observability(mut self, config: ObservabilityConfig) -> Self {
        self.observability_config = Some(config);
        self
    }

    /// Enable OpenTelemetry observability with default configuration
    pub fn with_default_observability(mut self) -> Self {
        self.observability_config = Some(ObservabilityConfig::default());
        self
    }

    /// Set service name for observability (used if observability is enabled)
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = Some(name.into());
        self
    }

    /// Connect and start the background task
    ///
    /// The initial connection is retried per the reconnection strategy.
    ///
    /// # Errors
    ///
    /// - `Error::ReconnectExhausted` if no connection could be established
    /// - `Error::InvalidConfig` if observability fails to initialize
    pub async fn connect(self) -> Result<EvmuxClient> {
        // Initialize observability if configured
        let metrics = if let Some(mut config) = self.observability_config {
            if let Some(name) = self.service_name {
                config.service_name = name;
            }

            evmux_core::init_observability(config.clone()).map_err(|e| {
                Error::InvalidConfig(format!("Failed to initialize observability: {}", e))
            })?;

            Some(Arc::new(ClientMetrics::new(config.service_name.clone())))
        } else {
            None
        };

        let strategy = self
            .reconnect_strategy
            .unwrap_or_else(|| Box::new(ExponentialBackoff::default()));
        let connection = Arc::new(ConnectionManager::new(
            self.url.clone(),
            strategy,
            metrics.clone(),
        ));

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tracing::info!(url = %self.url, "Connecting to server");
        let (sender, receiver) = connection.establish(&mut shutdown_rx, false).await?;

        let registry = SubscriptionRegistry::new();
        let outbound = Outbound::default();
        let epoch = outbound.lock().await.install(sender);
        connection.connected().await;
        tracing::debug!(epoch, "Connection installed");

        let task = ConnectionTask {
            registry: registry.clone(),
            outbound: outbound.clone(),
            connection: Arc::clone(&connection),
            dispatcher: Dispatcher::new(
                registry.clone(),
                outbound.clone(),
                metrics.clone(),
                self.heartbeat,
            ),
            shutdown: shutdown_rx,
            metrics: metrics.clone(),
        };
        tokio::spawn(task.run(receiver));

        Ok(EvmuxClient {
            registry,
            outbound,
            connection,
            shutdown: Arc::new(shutdown_tx),
            metrics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::FixedDelay;
    use evmux_core::Network;

    #[test]
    fn test_builder_creation() {
        let builder = ClientBuilder::new("ws://localhost:8546");
        assert_eq!(builder.url, "ws://localhost:8546");
        assert!(builder.reconnect_strategy.is_none());
        assert_eq!(builder.heartbeat, Some(HeartbeatConfig::default()));
    }

    #[test]
    fn test_builder_with_reconnect() {
        let strategy = Box::new(FixedDelay::new(Duration::from_millis(500)).with_max_attempts(10));
        let builder = ClientBuilder::new("ws://localhost:8546").with_reconnect(strategy);
        assert!(builder.reconnect_strategy.is_some());
    }

    #[test]
    fn test_builder_without_reconnect() {
        let builder = ClientBuilder::new("ws://localhost:8546").without_reconnect();
        let mut strategy = builder.reconnect_strategy.unwrap();
        assert_eq!(strategy.next_delay(0), None);
    }

    #[test]
    fn test_builder_heartbeat() {
        let builder = ClientBuilder::new("ws://localhost:8546")
            .with_heartbeat(Duration::from_secs(5), Duration::from_secs(2));
        assert_eq!(
            builder.heartbeat,
            Some(HeartbeatConfig::new(Duration::from_secs(5), Duration::from_secs(2)))
        );

        let builder = builder.without_heartbeat();
        assert!(builder.heartbeat.is_none());
    }

    #[test]
    fn test_builder_from_endpoint() {
        let config = EndpointConfig::new("key123").with_network(Network::PolygonMainnet);
        let builder = ClientBuilder::from_endpoint(&config).unwrap();
        assert_eq!(builder.url, "wss://polygon-mainnet.g.alchemy.com/v2/key123");

        let config = EndpointConfig::default().with_url("ws://127.0.0.1:8546");
        let builder = ClientBuilder::from_endpoint(&config).unwrap();
        assert_eq!(builder.url, "ws://127.0.0.1:8546");
    }

    #[test]
    fn test_builder_from_invalid_endpoint() {
        let config = EndpointConfig::default().with_url("http://127.0.0.1:8545");
        assert!(matches!(
            ClientBuilder::from_endpoint(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_builder_observability_config() {
        let config = ObservabilityConfig::new("test-client")
            .with_endpoint("http://localhost:4317")
            .with_log_level("debug");

        let builder = ClientBuilder::new("ws://localhost:8546").with_observability(config);

        let obs_config = builder.observability_config.unwrap();
        assert_eq!(obs_config.service_name, "test-client");
        assert_eq!(obs_config.log_level, "debug");
    }

    #[test]
    fn test_builder_default_observability() {
        let builder = ClientBuilder::new("ws://localhost:8546").with_default_observability();

        let obs_config = builder.observability_config.unwrap();
        assert_eq!(obs_config.service_name, "evmux");
    }

    #[test]
    fn test_builder_chaining() {
        let builder = ClientBuilder::new("ws://localhost:8546")
            .with_default_reconnect()
            .without_heartbeat()
            .service_name("test-service")
            .with_default_observability();

        assert!(builder.reconnect_strategy.is_some());
        assert!(builder.heartbeat.is_none());
        assert!(builder.observability_config.is_some());
        assert_eq!(builder.service_name, Some("test-service".to_string()));
    }

    #[tokio::test]
    async fn test_connect_refused_without_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = ClientBuilder::new(format!("ws://{}", addr))
            .without_reconnect()
            .connect()
            .await;

        assert!(matches!(result, Err(Error::ReconnectExhausted { attempts: 1 })));
    }
}
