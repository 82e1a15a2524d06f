//! Codec for the subscription socket
//!
//! Encodes outbound requests and classifies inbound frames. A frame from an
//! `eth_subscribe` endpoint is one of:
//!
//! - a **response** to one of our calls (has `id` and `result` or `error`)
//! - an **`eth_subscription` push** (has `params.subscription`)
//! - some other server **notification** we do not act on
//! - a **batch** of the above (JSON array)
//!
//! Classification is done on the raw JSON value instead of an untagged
//! enum, so that a malformed push (say, missing `params.result`) is reported
//! as a protocol error rather than silently decoded as something else.
//!
//! # Lenient error members
//!
//! Some servers answer a rejected `eth_subscribe` with a bare string in the
//! `error` member. Those are accepted and wrapped in a `-32000` error object.
//!
//! # Examples
//!
//! ```rust
//! use evmux_core::codec::{self, InboundMessage};
//!
//! let frame = r#"{"jsonrpc":"2.0","method":"eth_subscription",
//!                 "params":{"subscription":"0xabc","result":{"number":"0x1b4"}}}"#;
//! match codec::decode(frame).unwrap() {
//!     InboundMessage::Subscription(n) => assert_eq!(n.subscription.as_str(), "0xabc"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use crate::error::{Error, JsonRpcErrorData, Result};
use crate::eth::{PhysicalId, SubscriptionNotification, NOTIFICATION_METHOD};
use crate::types::{Id, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde::Serialize;
use serde_json::{Map, Value};

/// A classified inbound frame
#[derive(Debug, Clone)]
pub enum InboundMessage {
    /// Response to a request we sent
    Response(JsonRpcResponse),
    /// Event pushed for a subscription
    Subscription(SubscriptionNotification),
    /// Any other server notification
    Notification(JsonRpcNotification),
    /// Batch of raw values, decoded one by one with [`decode_value`]
    Batch(Vec<Value>),
}

/// Encode any serializable message to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode a JSON-RPC request to JSON
pub fn encode_request(req: &JsonRpcRequest) -> Result<String> {
    encode(req)
}

/// Decode a text frame
///
/// # Errors
///
/// - `Error::JsonRpc(parse_error)` if the text is not JSON
/// - `Error::Protocol` if the JSON is not a message we understand, or the
///   batch is empty
pub fn decode(data: &str) -> Result<InboundMessage> {
    let value: Value =
        serde_json::from_str(data).map_err(|_e| Error::JsonRpc(JsonRpcErrorData::parse_error()))?;

    match value {
        Value::Array(items) if items.is_empty() => {
            Err(Error::Protocol("empty batch".to_string()))
        }
        Value::Array(items) => Ok(InboundMessage::Batch(items)),
        other => decode_value(other),
    }
}

/// Classify a single JSON value
///
/// Nested arrays are rejected; batches only nest one level deep.
pub fn decode_value(value: Value) -> Result<InboundMessage> {
    let Value::Object(mut obj) = value else {
        return Err(Error::Protocol("expected a JSON object".to_string()));
    };

    if let Some(method) = obj.get("method").and_then(Value::as_str).map(str::to_owned) {
        if method == NOTIFICATION_METHOD {
            return decode_subscription(obj.remove("params")).map(InboundMessage::Subscription);
        }
        return Ok(InboundMessage::Notification(JsonRpcNotification::new(
            method,
            obj.remove("params"),
        )));
    }

    if obj.contains_key("id") && (obj.contains_key("result") || obj.contains_key("error")) {
        return decode_response(obj).map(InboundMessage::Response);
    }

    Err(Error::Protocol(
        "frame is neither a response nor a notification".to_string(),
    ))
}

fn decode_subscription(params: Option<Value>) -> Result<SubscriptionNotification> {
    let Some(Value::Object(mut params)) = params else {
        return Err(Error::Protocol(
            "eth_subscription without params object".to_string(),
        ));
    };

    let subscription = match params.remove("subscription") {
        Some(Value::String(id)) => PhysicalId(id),
        Some(_) => {
            return Err(Error::Protocol(
                "params.subscription is not a string".to_string(),
            ))
        }
        None => {
            return Err(Error::Protocol(
                "eth_subscription without params.subscription".to_string(),
            ))
        }
    };

    let result = params.remove("result").ok_or_else(|| {
        Error::Protocol(format!("eth_subscription for {} without params.result", subscription))
    })?;

    Ok(SubscriptionNotification {
        subscription,
        result,
    })
}

fn decode_response(mut obj: Map<String, Value>) -> Result<JsonRpcResponse> {
    let id: Id = obj
        .remove("id")
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::Protocol(format!("invalid response id: {}", e)))?
        .unwrap_or(Id::Null);

    let error = match obj.remove("error") {
        None | Some(Value::Null) => None,
        Some(Value::String(message)) => Some(JsonRpcErrorData::server_error(message)),
        Some(value @ Value::Object(_)) => Some(
            serde_json::from_value(value)
                .map_err(|e| Error::Protocol(format!("invalid error object: {}", e)))?,
        ),
        Some(other) => Some(JsonRpcErrorData::server_error(other.to_string())),
    };

    let response = match error {
        Some(error) => JsonRpcResponse::error(error, id),
        None => JsonRpcResponse::success(obj.remove("result").unwrap_or(Value::Null), id),
    };
    Ok(response)
}
