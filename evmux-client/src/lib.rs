//! Persistent `eth_subscribe` multiplexer over a single WebSocket
//!
//! This crate keeps any number of logical event subscriptions alive over one
//! WebSocket connection to an Ethereum JSON-RPC endpoint, and transparently
//! re-establishes them when the connection drops.
//!
//! # Core Features
//!
//! - **Stable ids**: each subscription gets a client-side virtual id that
//!   survives reconnects; the server's physical id is tracked internally
//! - **Auto-Reconnection**: exponential backoff with jitter (pluggable),
//!   followed by a resubscribe pass for every active subscription
//! - **Multiple handlers**: attach and detach handlers on a live subscription
//! - **One-shot subscriptions**: `once` unsubscribes on the first event
//! - **Heartbeat**: ping/pong liveness check to catch half-open sockets
//! - **Observability**: OpenTelemetry metrics and `tracing` spans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use evmux_client::{EvmuxClient, EventType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EvmuxClient::connect("wss://eth-mainnet.g.alchemy.com/v2/demo").await?;
//!
//!     let heads = client
//!         .subscribe(EventType::NewHeads, None, |head| async move {
//!             println!("new block {}", head["number"]);
//!         })
//!         .await?;
//!     println!("subscribed as {}", heads.id());
//!
//!     tokio::signal::ctrl_c().await?;
//!     client.unsubscribe_all().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Watching the Connection
//!
//! ```rust,no_run
//! use evmux_client::{ClientBuilder, ConnectionState, FixedDelay};
//! use std::time::Duration;
//!
//! # async fn example() -> evmux_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:8546")
//!     .with_reconnect(Box::new(
//!         FixedDelay::new(Duration::from_secs(2)).with_max_attempts(5),
//!     ))
//!     .connect()
//!     .await?;
//!
//! let mut states = client.state_changes();
//! while states.changed().await.is_ok() {
//!     let state = states.borrow_and_update().clone();
//!     if let ConnectionState::Failed { attempts } = state {
//!         eprintln!("gave up after {} attempts", attempts);
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod client_builder;
mod connection_state;
mod correlation;
mod dispatcher;
mod handler;
mod metrics;
mod reconnect;
mod registry;
mod subscription;
mod transport;

pub use client::EvmuxClient;
pub use client_builder::ClientBuilder;
pub use connection_state::{ConnectionManager, ConnectionState};
pub use dispatcher::HeartbeatConfig;
pub use handler::{handler_fn, EventHandler, HandlerId};
pub use metrics::ClientMetrics;
pub use reconnect::{ExponentialBackoff, FixedDelay, NoReconnect, ReconnectionStrategy};
pub use subscription::{Subscription, SubscriptionInfo, SubscriptionStatus, VirtualId};
pub use transport::{connect, Frame, TransportReceiver, TransportSender};

pub use evmux_core::{EventType, PhysicalId};
