//! evmux - persistent `eth_subscribe` multiplexer
//!
//! This is the main convenience crate that re-exports the evmux sub-crates.
//! Use it if you want a single dependency.
//!
//! # Architecture
//!
//! - **evmux-core**: JSON-RPC and eth subscription wire types, codec, errors,
//!   endpoint configuration, observability
//! - **evmux-client**: WebSocket transport, reconnection, subscription
//!   registry, dispatcher and the client itself
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use evmux::{EndpointConfig, EventType, EvmuxClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EvmuxClient::connect_endpoint(&EndpointConfig::from_env()?).await?;
//!
//!     client
//!         .subscribe(EventType::NewHeads, None, |head| async move {
//!             println!("block {}", head["number"]);
//!         })
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.unsubscribe_all().await?;
//!     Ok(())
//! }
//! ```

pub use evmux_client as client;
pub use evmux_core as core;

pub use evmux_client::{
    ClientBuilder, ConnectionState, EvmuxClient, ExponentialBackoff, FixedDelay, NoReconnect,
    Subscription, SubscriptionStatus, VirtualId,
};
pub use evmux_core::{EndpointConfig, Error, EventType, Network, PhysicalId, Result};
