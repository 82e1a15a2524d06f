//! Wire types and shared plumbing for evmux
//!
//! evmux keeps many logical `eth_subscribe` subscriptions alive over one
//! reconnecting WebSocket. This crate holds everything that does not touch
//! the socket:
//!
//! - **Types**: the JSON-RPC 2.0 request, response and notification shapes
//! - **Eth**: subscription topics, server-assigned ids, request builders
//! - **Codec**: encoding of requests and classification of inbound frames
//! - **Error handling**: the crate-wide `Error` and the wire error object
//! - **Config**: endpoint and network selection
//! - **Observability**: OpenTelemetry and log output setup
//!
//! The socket, the registry and the reconnect loop live in `evmux-client`.
//!
//! # Example
//!
//! ```rust
//! use evmux_core::{codec, eth, EventType, InboundMessage};
//!
//! let request = eth::subscribe_request(1, &EventType::NewHeads, None);
//! let json = codec::encode_request(&request).unwrap();
//! assert!(json.contains("eth_subscribe"));
//!
//! match codec::decode(r#"{"jsonrpc":"2.0","id":1,"result":"0xAAA"}"#).unwrap() {
//!     InboundMessage::Response(resp) => assert!(resp.is_success()),
//!     _ => unreachable!(),
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod eth;
pub mod observability;
pub mod types;

pub use codec::InboundMessage;
pub use config::{EndpointConfig, Network};
pub use error::{Error, JsonRpcErrorData, Result};
pub use eth::{EventType, PhysicalId, SubscriptionNotification};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{Id, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
