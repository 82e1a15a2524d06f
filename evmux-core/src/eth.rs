//! `eth_subscribe` wire vocabulary
//!
//! Event topics, server-assigned subscription ids, the payload of an
//! `eth_subscription` push and builders for the subscribe/unsubscribe
//! request pair.
//!
//! ```text
//! -> {"jsonrpc":"2.0","id":1,"method":"eth_subscribe","params":["newHeads"]}
//! <- {"jsonrpc":"2.0","id":1,"result":"0x9ce59a13059e417087c02d3236a0b1cc"}
//! <- {"jsonrpc":"2.0","method":"eth_subscription",
//!     "params":{"subscription":"0x9ce59a13059e417087c02d3236a0b1cc","result":{...}}}
//! -> {"jsonrpc":"2.0","id":2,"method":"eth_unsubscribe","params":["0x9ce59a13059e417087c02d3236a0b1cc"]}
//! <- {"jsonrpc":"2.0","id":2,"result":true}
//! ```

use crate::types::{Id, JsonRpcRequest};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Method used to open a subscription
pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";
/// Method used to close a subscription
pub const UNSUBSCRIBE_METHOD: &str = "eth_unsubscribe";
/// Method name carried by every subscription push
pub const NOTIFICATION_METHOD: &str = "eth_subscription";

/// Subscription topic accepted by `eth_subscribe`
///
/// The named variants are the topics the endpoint documents; `Custom`
/// passes any other topic string through untouched.
///
/// # Examples
///
/// ```rust
/// use evmux_core::EventType;
///
/// let heads: EventType = "newHeads".parse().unwrap();
/// assert_eq!(heads, EventType::NewHeads);
///
/// let other = EventType::from("syncing");
/// assert_eq!(other.as_str(), "syncing");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Full transactions or hashes mined on the network, filtered by the params
    MinedTransactions,
    /// Full transactions or hashes entering the mempool, filtered by the params
    PendingTransactions,
    /// Hashes of transactions entering the mempool
    NewPendingTransactions,
    /// Headers of new blocks
    NewHeads,
    /// Logs matching an address/topics filter
    Logs,
    /// Any other topic
    Custom(String),
}

impl EventType {
    /// Wire name of the topic
    pub fn as_str(&self) -> &str {
        match self {
            EventType::MinedTransactions => "alchemy_minedTransactions",
            EventType::PendingTransactions => "alchemy_pendingTransactions",
            EventType::NewPendingTransactions => "newPendingTransactions",
            EventType::NewHeads => "newHeads",
            EventType::Logs => "logs",
            EventType::Custom(name) => name,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "alchemy_minedTransactions" => EventType::MinedTransactions,
            "alchemy_pendingTransactions" => EventType::PendingTransactions,
            "newPendingTransactions" => EventType::NewPendingTransactions,
            "newHeads" => EventType::NewHeads,
            "logs" => EventType::Logs,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        EventType::from(s.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventType::from(name))
    }
}

/// Server-assigned subscription id
///
/// Only valid for the connection that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalId(pub String);

impl PhysicalId {
    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhysicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhysicalId {
    fn from(s: &str) -> Self {
        PhysicalId(s.to_string())
    }
}

impl From<String> for PhysicalId {
    fn from(s: String) -> Self {
        PhysicalId(s)
    }
}

/// Decoded `eth_subscription` push
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionNotification {
    /// Physical id the event is tagged with
    pub subscription: PhysicalId,
    /// Event payload, handed to subscription handlers untouched
    pub result: serde_json::Value,
}

/// Build an `eth_subscribe` request
///
/// `params` is appended as the second positional parameter when present.
/// `null`, `{}` and `[]` count as absent.
///
/// ```rust
/// use evmux_core::{eth, EventType};
/// use serde_json::json;
///
/// let req = eth::subscribe_request(7, &EventType::Logs, Some(&json!({"address": "0xabc"})));
/// assert_eq!(req.params, Some(json!(["logs", {"address": "0xabc"}])));
/// ```
pub fn subscribe_request(
    id: u64,
    event_type: &EventType,
    params: Option<&serde_json::Value>,
) -> JsonRpcRequest {
    let mut positional = vec![serde_json::Value::String(event_type.as_str().to_string())];
    if let Some(params) = params.filter(|params| !is_empty_params(params)) {
        positional.push(params.clone());
    }
    JsonRpcRequest::new(
        SUBSCRIBE_METHOD,
        Some(serde_json::Value::Array(positional)),
        Id::from(id),
    )
}

fn is_empty_params(params: &serde_json::Value) -> bool {
    match params {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Build an `eth_unsubscribe` request for a physical id
pub fn unsubscribe_request(id: u64, physical_id: &PhysicalId) -> JsonRpcRequest {
    JsonRpcRequest::new(
        UNSUBSCRIBE_METHOD,
        Some(serde_json::json!([physical_id.as_str()])),
        Id::from(id),
    )
}
