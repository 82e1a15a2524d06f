//! JSON-RPC 2.0 types used on the subscription socket
//!
//! Only the shapes that travel over an `eth_subscribe` connection are
//! modelled here:
//!
//! 1. **Request**: `eth_subscribe` / `eth_unsubscribe` calls sent by the client
//! 2. **Response**: confirmations and acknowledgements for those calls
//! 3. **Notification**: unsolicited server pushes (`eth_subscription`)
//!
//! # Request IDs
//!
//! The client always sends numeric ids drawn from a monotonic counter, but a
//! server may echo any JSON-RPC id shape, so `Id` accepts strings and null
//! as well.

use crate::error::JsonRpcErrorData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC 2.0 request ID
///
/// This enum uses `#[serde(untagged)]` to serialize directly as the inner
/// value, matching the JSON-RPC 2.0 wire format.
///
/// # Examples
///
/// ```rust
/// use evmux_core::Id;
///
/// let id: Id = 42u64.into();
/// assert_eq!(id.as_u64(), Some(42));
/// assert_eq!(id.to_string(), "42");
///
/// let foreign: Id = "abc".into();
/// assert_eq!(foreign.as_u64(), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
    /// Null identifier
    Null,
}

impl Id {
    /// Numeric value of the id, if it can be one of ours
    ///
    /// The client only issues non-negative numeric ids, so anything else
    /// can never correlate with a pending call.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Number(n) if *n >= 0 => Some(*n as u64),
            _ => None,
        }
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::String(s) => write!(f, "\"{}\"", s),
            Id::Number(n) => write!(f, "{}", n),
            Id::Null => write!(f, "null"),
        }
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl From<u64> for Id {
    /// Note: casts to i64; request counters never get near i64::MAX.
    fn from(n: u64) -> Self {
        Id::Number(n as i64)
    }
}

/// JSON-RPC 2.0 request message
///
/// # Examples
///
/// ```rust
/// use evmux_core::{JsonRpcRequest, Id};
/// use serde_json::json;
///
/// let req = JsonRpcRequest::new("eth_subscribe", Some(json!(["newHeads"])), Id::Number(1));
/// assert_eq!(req.jsonrpc, "2.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version - always "2.0"
    pub jsonrpc: String,
    /// Name of the remote method to invoke
    pub method: String,
    /// Optional parameters, skipped in JSON if None
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    /// Correlation id echoed back by the response
    pub id: Id,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC 2.0 request
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 notification message
///
/// A message with a `method` and no `id`. On the subscription socket the
/// only notification we act on is `eth_subscription`; anything else is
/// decoded into this type and logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version - always "2.0"
    pub jsonrpc: String,
    /// Name of the method/event being notified
    pub method: String,
    /// Optional parameters or event data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC 2.0 notification
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message
///
/// Carries either a result or an error for a request we sent.
///
/// # Examples
///
/// ```rust
/// use evmux_core::{JsonRpcResponse, JsonRpcErrorData, Id};
/// use serde_json::json;
///
/// let confirmation = JsonRpcResponse::success(json!("0x9ce59a13"), Id::Number(1));
/// assert!(confirmation.is_success());
///
/// let rejection = JsonRpcResponse::error(JsonRpcErrorData::invalid_params("bad topic"), Id::Number(2));
/// assert!(rejection.is_error());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version - always "2.0"
    pub jsonrpc: String,
    /// The result of the call (present only on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information (present only on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorData>,
    /// Request ID from the original request
    pub id: Id,
}

impl JsonRpcResponse {
    /// Create a successful JSON-RPC 2.0 response
    pub fn success(result: serde_json::Value, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error JSON-RPC 2.0 response
    pub fn error(error: JsonRpcErrorData, id: Id) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }

    /// Check if the response represents a successful result
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Check if the response represents an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Split the response into the outcome the caller cares about
    ///
    /// A response with neither member is treated as a `null` result.
    pub fn into_outcome(self) -> std::result::Result<serde_json::Value, JsonRpcErrorData> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(serde_json::Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(Id::String("test".to_string()).to_string(), "\"test\"");
        assert_eq!(Id::Number(42).to_string(), "42");
        assert_eq!(Id::Null.to_string(), "null");
    }

    #[test]
    fn test_id_as_u64() {
        assert_eq!(Id::Number(7).as_u64(), Some(7));
        assert_eq!(Id::Number(-1).as_u64(), None);
        assert_eq!(Id::String("7".into()).as_u64(), None);
        assert_eq!(Id::Null.as_u64(), None);
    }

    #[test]
    fn test_request_serialization() {
        let req = JsonRpcRequest::new("eth_unsubscribe", Some(serde_json::json!(["0xab"])), Id::Number(3));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_unsubscribe\""));
        assert!(json.contains("\"id\":3"));
    }

    #[test]
    fn test_request_without_params_omits_field() {
        let req = JsonRpcRequest::new("eth_chainId", None, Id::Number(1));
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_response_outcome() {
        let ok = JsonRpcResponse::success(serde_json::json!(true), Id::Number(1));
        assert_eq!(ok.into_outcome().unwrap(), serde_json::json!(true));

        let err = JsonRpcResponse::error(JsonRpcErrorData::internal_error("boom"), Id::Number(2));
        assert_eq!(err.into_outcome().unwrap_err().code, -32603);
    }
}
