//! Error types for evmux
//!
//! This module defines two error types:
//!
//! - **Error**: Application-level errors returned by the multiplexer (uses thiserror)
//! - **JsonRpcErrorData**: Wire-format error objects carried by JSON-RPC 2.0 responses
//!
//! # Error Categories
//!
//! The subscription multiplexer sorts failures into four groups, and only
//! the first one ever reaches a caller as a hard failure:
//!
//! - **Connection errors** (`Connection`, `WebSocket`, `ConnectionClosed`):
//!   recovered by the reconnection controller; surfaced as
//!   `ReconnectExhausted` once the retry bound is used up
//! - **Protocol errors** (`Protocol`, `Serialization`): the offending frame is
//!   logged and dropped
//! - **Subscription errors** (`SubscriptionRejected`): the server refused an
//!   `eth_subscribe`; reported through the subscription handle
//! - **Lifecycle errors** (`Unsubscribed`, `Terminated`): the caller used a
//!   subscription or client after tearing it down
//!
//! # Examples
//!
//! ```rust
//! use evmux_core::{Error, JsonRpcErrorData};
//!
//! let rejected = Error::SubscriptionRejected(JsonRpcErrorData::invalid_params("unknown topic"));
//! assert!(rejected.to_string().contains("unknown topic"));
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for evmux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Application-level error type for evmux operations
///
/// The enum is `Clone` so a single failure (for example an exhausted
/// reconnection budget) can be handed to every waiting subscription handle.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// JSON-RPC error object received from the server
    #[error("JSON-RPC error: {0}")]
    JsonRpc(#[from] JsonRpcErrorData),

    /// Serialization or deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// WebSocket transport layer error on an established connection
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection establishment failed (refused, TLS failure, bad URL)
    #[error("Connection error: {0}")]
    Connection(String),

    /// A frame could not be interpreted as a JSON-RPC message we understand
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server answered `eth_subscribe` with an error
    ///
    /// The subscription is removed from the active set and will not be
    /// retried after a reconnect.
    #[error("Subscription rejected: {0}")]
    SubscriptionRejected(JsonRpcErrorData),

    /// The subscription was unsubscribed before it could be confirmed
    #[error("Subscription was unsubscribed")]
    Unsubscribed,

    /// The connection is closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// The reconnection controller gave up
    ///
    /// This is the terminal failure state; it is distinct from the transient
    /// "reconnecting" condition callers see as a delivery gap.
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of connection attempts made before giving up
        attempts: u32,
    },

    /// The client was torn down with `unsubscribe_all` and cannot be reused
    #[error("Client has been terminated")]
    Terminated,
}

impl Error {
    /// Returns true for errors the reconnection controller recovers from
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::WebSocket(_) | Error::ConnectionClosed
        )
    }
}

/// JSON-RPC 2.0 error object
///
/// This is the exact wire format of the `error` member of a response.
///
/// # Standard Error Codes
///
/// - `-32700`: Parse error
/// - `-32600`: Invalid Request
/// - `-32601`: Method not found
/// - `-32602`: Invalid params
/// - `-32603`: Internal error
/// - `-32000 to -32099`: Server error (implementation-defined)
///
/// # Examples
///
/// ```rust
/// use evmux_core::JsonRpcErrorData;
/// use serde_json::json;
///
/// let error = JsonRpcErrorData::with_data(
///     -32602,
///     "invalid logs filter",
///     json!({"field": "topics"})
/// );
/// assert_eq!(error.code, -32602);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// Numeric error code indicating the error type
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Optional additional error information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcErrorData {
    /// Create a new JSON-RPC error with code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new JSON-RPC error with additional data
    pub fn with_data(code: i32, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create a parse error (-32700)
    pub fn parse_error() -> Self {
        Self::new(-32700, "Parse error")
    }

    /// Create an invalid request error (-32600)
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(-32600, msg)
    }

    /// Create an invalid params error (-32602)
    ///
    /// Nodes answer an `eth_subscribe` for an unsupported topic or a bad
    /// filter with this code.
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(-32602, msg)
    }

    /// Create an internal error (-32603)
    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new(-32603, msg)
    }

    /// Create a generic server error (-32000)
    ///
    /// Used to wrap error members that are not proper error objects, such
    /// as servers that reply with `"error": "Invalid subscription ID"`.
    pub fn server_error(msg: impl Into<String>) -> Self {
        Self::new(-32000, msg)
    }
}

impl std::fmt::Display for JsonRpcErrorData {
    /// Formats as "[code] message", e.g. "[-32602] invalid logs filter"
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcErrorData {}
