//! Subscription registry
//!
//! Holds every live logical subscription and the two indexes the
//! dispatcher needs:
//!
//! - `entries`: virtual id → subscription (event type, params, handlers,
//!   current physical id, status channel)
//! - `by_physical`: physical id → virtual id, valid for the current
//!   connection only and cleared on every disconnect
//!
//! together with the correlation table for in-flight `eth_subscribe` /
//! `eth_unsubscribe` calls.
//!
//! # Locking
//!
//! All state sits behind one `tokio::sync::Mutex`. Every method takes the
//! lock once, does its bookkeeping and returns the requests that should be
//! sent; the registry never performs I/O and never runs a handler while
//! locked. Callers that need a request to go out atomically with the
//! registry change take the outbound lock first (see `transport::Outbound`).
//!
//! # Epochs
//!
//! Each entry remembers the connection epoch it last sent `eth_subscribe`
//! on. A subscribe request is issued at most once per entry per epoch, so a
//! `subscribe` racing with the resubscribe pass after a reconnect never
//! produces two server-side subscriptions.

use crate::correlation::{CorrelationTable, PendingCall};
use crate::handler::{EventHandler, HandlerId, HandlerQueue};
use crate::subscription::{SubscriptionInfo, SubscriptionStatus, VirtualId};
use evmux_core::{eth, Error, EventType, Id, JsonRpcErrorData, JsonRpcRequest, PhysicalId, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

struct Entry {
    seq: u64,
    event_type: EventType,
    params: Option<Value>,
    physical_id: Option<PhysicalId>,
    requested_epoch: Option<u64>,
    handlers: Vec<(HandlerId, EventHandler)>,
    once: bool,
    status: watch::Sender<SubscriptionStatus>,
    queue: HandlerQueue,
}

/// Result of [`SubscriptionRegistry::register`]
pub(crate) struct Registered {
    pub(crate) virtual_id: VirtualId,
    pub(crate) handler_id: HandlerId,
    pub(crate) status: watch::Receiver<SubscriptionStatus>,
    /// `eth_subscribe` to send, if a connection is live
    pub(crate) request: Option<JsonRpcRequest>,
}

/// A removed entry
#[derive(Debug)]
pub(crate) struct Removed {
    pub(crate) event_type: EventType,
    /// `eth_unsubscribe` to send, if the entry was bound on a live connection
    pub(crate) request: Option<JsonRpcRequest>,
}

/// Everything needed to deliver one notification outside the lock
pub(crate) struct Delivery {
    pub(crate) virtual_id: VirtualId,
    pub(crate) event_type: EventType,
    pub(crate) handlers: Vec<EventHandler>,
    pub(crate) queue: HandlerQueue,
    /// A `once` subscription fired and was removed
    pub(crate) last: bool,
    /// Set when a `once` subscription fired; send before queueing the payload
    pub(crate) unsubscribe: Option<JsonRpcRequest>,
}

/// What a response turned out to mean
#[derive(Debug)]
pub(crate) enum Resolution {
    /// A subscribe confirmation bound a physical id
    Bound {
        virtual_id: VirtualId,
        physical_id: PhysicalId,
        /// Entry that previously held the same physical id
        displaced: Option<VirtualId>,
    },
    /// The server refused a subscribe; the entry was removed
    Rejected {
        virtual_id: VirtualId,
        error: JsonRpcErrorData,
    },
    /// Confirmation for an entry that was unsubscribed meanwhile
    Orphaned {
        physical_id: PhysicalId,
        request: JsonRpcRequest,
    },
    /// Unsubscribe acknowledged; `acknowledged` is the boolean result
    Unsubscribed {
        physical_id: PhysicalId,
        acknowledged: bool,
    },
    /// Unsubscribe answered with an error
    UnsubscribeFailed {
        physical_id: PhysicalId,
        error: JsonRpcErrorData,
    },
    /// Subscribe confirmation whose result is not a string id
    Malformed { virtual_id: VirtualId, result: Value },
    /// Error response for an entry that no longer exists
    Stale { virtual_id: VirtualId },
    /// No pending call has this id
    Unknown,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<VirtualId, Entry>,
    by_physical: HashMap<PhysicalId, VirtualId>,
    calls: CorrelationTable,
    next_seq: u64,
    next_handler: u64,
}

impl RegistryState {
    fn next_handler_id(&mut self) -> HandlerId {
        self.next_handler += 1;
        HandlerId(self.next_handler)
    }

    fn ordered_ids(&self) -> Vec<VirtualId> {
        let mut ids: Vec<(u64, VirtualId)> = self
            .entries
            .iter()
            .map(|(virtual_id, entry)| (entry.seq, *virtual_id))
            .collect();
        ids.sort_unstable_by_key(|(seq, _)| *seq);
        ids.into_iter().map(|(_, virtual_id)| virtual_id).collect()
    }

    fn issue_subscribe(&mut self, virtual_id: VirtualId, epoch: u64) -> Option<JsonRpcRequest> {
        let entry = self.entries.get_mut(&virtual_id)?;
        if entry.requested_epoch == Some(epoch) {
            return None;
        }
        entry.requested_epoch = Some(epoch);

        let id = self.calls.issue(PendingCall::Subscribe { virtual_id });
        Some(eth::subscribe_request(
            id,
            &entry.event_type,
            entry.params.as_ref(),
        ))
    }

    fn issue_unsubscribe(&mut self, physical_id: &PhysicalId) -> JsonRpcRequest {
        let id = self.calls.issue(PendingCall::Unsubscribe {
            physical_id: physical_id.clone(),
        });
        eth::unsubscribe_request(id, physical_id)
    }

    fn remove_entry(
        &mut self,
        virtual_id: &VirtualId,
        final_status: SubscriptionStatus,
        live: bool,
    ) -> Option<Removed> {
        let entry = self.entries.remove(virtual_id)?;

        let request = match &entry.physical_id {
            Some(physical_id) => {
                if self.by_physical.get(physical_id) == Some(virtual_id) {
                    self.by_physical.remove(physical_id);
                }
                live.then(|| self.issue_unsubscribe(physical_id))
            }
            None => None,
        };

        entry.status.send_replace(final_status);
        Some(Removed {
            event_type: entry.event_type,
            request,
        })
    }

    fn bind_physical(&mut self, virtual_id: VirtualId, physical_id: PhysicalId) -> Resolution {
        let Some(entry) = self.entries.get_mut(&virtual_id) else {
            let request = self.issue_unsubscribe(&physical_id);
            return Resolution::Orphaned {
                physical_id,
                request,
            };
        };

        if let Some(previous) = entry.physical_id.replace(physical_id.clone()) {
            if previous != physical_id && self.by_physical.get(&previous) == Some(&virtual_id) {
                self.by_physical.remove(&previous);
            }
        }
        entry
            .status
            .send_replace(SubscriptionStatus::Active(physical_id.clone()));

        // The mapping is replaced, never merged.
        let displaced = self
            .by_physical
            .insert(physical_id.clone(), virtual_id)
            .filter(|other| *other != virtual_id);
        if let Some(other) = displaced {
            if let Some(other_entry) = self.entries.get_mut(&other) {
                other_entry.physical_id = None;
                other_entry.status.send_replace(SubscriptionStatus::Pending);
            }
        }

        Resolution::Bound {
            virtual_id,
            physical_id,
            displaced,
        }
    }
}

/// Shared registry of logical subscriptions
#[derive(Clone, Default)]
pub(crate) struct SubscriptionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a subscription
    ///
    /// With `epoch` set, the `eth_subscribe` request for the new entry is
    /// returned for the caller to send; otherwise the next resubscribe pass
    /// picks it up.
    pub(crate) async fn register(
        &self,
        event_type: EventType,
        params: Option<Value>,
        handler: EventHandler,
        once: bool,
        epoch: Option<u64>,
    ) -> Registered {
        let mut state = self.state.lock().await;

        let virtual_id = VirtualId::new();
        let handler_id = state.next_handler_id();
        let (status_tx, status_rx) = watch::channel(SubscriptionStatus::Pending);
        let queue = HandlerQueue::spawn(virtual_id, event_type.clone(), status_tx.subscribe());
        let seq = state.next_seq;
        state.next_seq += 1;

        state.entries.insert(
            virtual_id,
            Entry {
                seq,
                event_type,
                params,
                physical_id: None,
                requested_epoch: None,
                handlers: vec![(handler_id, handler)],
                once,
                status: status_tx,
                queue,
            },
        );

        let request = epoch.and_then(|epoch| state.issue_subscribe(virtual_id, epoch));

        Registered {
            virtual_id,
            handler_id,
            status: status_rx,
            request,
        }
    }

    /// `eth_subscribe` requests for every entry not yet requested on `epoch`,
    /// in registration order
    pub(crate) async fn resubscribe_all(&self, epoch: u64) -> Vec<JsonRpcRequest> {
        let mut state = self.state.lock().await;
        state
            .ordered_ids()
            .into_iter()
            .filter_map(|virtual_id| state.issue_subscribe(virtual_id, epoch))
            .collect()
    }

    /// Match a response to its pending call and apply it
    pub(crate) async fn resolve(
        &self,
        id: &Id,
        outcome: std::result::Result<Value, JsonRpcErrorData>,
    ) -> Resolution {
        let mut state = self.state.lock().await;

        let Some(call) = id.as_u64().and_then(|id| state.calls.take(id)) else {
            return Resolution::Unknown;
        };

        match call {
            PendingCall::Subscribe { virtual_id } => match outcome {
                Ok(Value::String(raw)) => state.bind_physical(virtual_id, PhysicalId(raw)),
                Ok(result) => Resolution::Malformed { virtual_id, result },
                Err(error) => {
                    let status = SubscriptionStatus::Rejected(error.clone());
                    match state.remove_entry(&virtual_id, status, false) {
                        Some(_) => Resolution::Rejected { virtual_id, error },
                        None => Resolution::Stale { virtual_id },
                    }
                }
            },
            PendingCall::Unsubscribe { physical_id } => match outcome {
                Ok(result) => Resolution::Unsubscribed {
                    physical_id,
                    acknowledged: result == Value::Bool(true),
                },
                Err(error) => Resolution::UnsubscribeFailed { physical_id, error },
            },
        }
    }

    /// Look up the subscription for a notification
    ///
    /// Returns a snapshot of its handlers and its delivery queue. A `once`
    /// subscription is removed here, so a second notification racing in
    /// finds nothing.
    pub(crate) async fn route(&self, physical_id: &PhysicalId) -> Option<Delivery> {
        let mut state = self.state.lock().await;

        let virtual_id = *state.by_physical.get(physical_id)?;
        let entry = state.entries.get(&virtual_id)?;
        let handlers = entry
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let event_type = entry.event_type.clone();
        let queue = entry.queue.clone();
        let once = entry.once;

        let unsubscribe = if once {
            state
                .remove_entry(&virtual_id, SubscriptionStatus::Closed, true)
                .and_then(|removed| removed.request)
        } else {
            None
        };

        Some(Delivery {
            virtual_id,
            event_type,
            handlers,
            queue,
            last: once,
            unsubscribe,
        })
    }

    /// Remove a subscription
    ///
    /// Returns `None` if it was not registered.
    pub(crate) async fn unregister(&self, virtual_id: &VirtualId, live: bool) -> Option<Removed> {
        self.state
            .lock()
            .await
            .remove_entry(virtual_id, SubscriptionStatus::Closed, live)
    }

    /// Remove every subscription of a topic
    pub(crate) async fn unregister_event(&self, event_type: &EventType, live: bool) -> Vec<Removed> {
        let mut state = self.state.lock().await;
        let matching: Vec<VirtualId> = state
            .ordered_ids()
            .into_iter()
            .filter(|virtual_id| {
                state
                    .entries
                    .get(virtual_id)
                    .is_some_and(|entry| &entry.event_type == event_type)
            })
            .collect();

        matching
            .iter()
            .filter_map(|virtual_id| state.remove_entry(virtual_id, SubscriptionStatus::Closed, live))
            .collect()
    }

    /// Remove everything, returning the unsubscribe requests for bound entries
    pub(crate) async fn drain(&self, live: bool) -> Vec<JsonRpcRequest> {
        let mut state = self.state.lock().await;
        let requests = state
            .ordered_ids()
            .iter()
            .filter_map(|virtual_id| state.remove_entry(virtual_id, SubscriptionStatus::Closed, live))
            .filter_map(|removed| removed.request)
            .collect();
        state.calls.clear();
        requests
    }

    /// Forget everything tied to the lost connection
    ///
    /// Physical ids, the physical index and pending calls are cleared;
    /// entries, their virtual ids and handlers are kept. Returns the number
    /// of pending calls that were abandoned.
    pub(crate) async fn connection_lost(&self) -> usize {
        let mut state = self.state.lock().await;
        state.by_physical.clear();
        for entry in state.entries.values_mut() {
            entry.physical_id = None;
            entry.requested_epoch = None;
            entry.status.send_if_modified(|status| {
                if matches!(status, SubscriptionStatus::Active(_)) {
                    *status = SubscriptionStatus::Pending;
                    true
                } else {
                    false
                }
            });
        }
        state.calls.clear()
    }

    /// Remove everything with a `Failed` status after the client gave up
    pub(crate) async fn fail_all(&self, attempts: u32) -> usize {
        let mut state = self.state.lock().await;
        let ids = state.ordered_ids();
        for virtual_id in &ids {
            state.remove_entry(virtual_id, SubscriptionStatus::Failed { attempts }, false);
        }
        state.by_physical.clear();
        state.calls.clear();
        ids.len()
    }

    /// Attach a handler to a registered subscription
    pub(crate) async fn add_handler(
        &self,
        virtual_id: &VirtualId,
        handler: EventHandler,
    ) -> Result<HandlerId> {
        let mut state = self.state.lock().await;
        let handler_id = state.next_handler_id();
        let entry = state.entries.get_mut(virtual_id).ok_or(Error::Unsubscribed)?;
        entry.handlers.push((handler_id, handler));
        Ok(handler_id)
    }

    /// Detach a handler
    pub(crate) async fn remove_handler(&self, virtual_id: &VirtualId, handler_id: HandlerId) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.entries.get_mut(virtual_id) else {
            return false;
        };
        let before = entry.handlers.len();
        entry.handlers.retain(|(id, _)| *id != handler_id);
        entry.handlers.len() != before
    }

    /// Number of registered subscriptions
    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Number of handlers, across all subscriptions or those of one topic
    pub(crate) async fn listener_count(&self, event_type: Option<&EventType>) -> usize {
        self.state
            .lock()
            .await
            .entries
            .values()
            .filter(|entry| event_type.map_or(true, |wanted| &entry.event_type == wanted))
            .map(|entry| entry.handlers.len())
            .sum()
    }

    /// Snapshot of every subscription in registration order
    pub(crate) async fn snapshot(&self) -> Vec<SubscriptionInfo> {
        let state = self.state.lock().await;
        state
            .ordered_ids()
            .iter()
            .filter_map(|virtual_id| {
                let entry = state.entries.get(virtual_id)?;
                Some(SubscriptionInfo {
                    id: *virtual_id,
                    event_type: entry.event_type.clone(),
                    params: entry.params.clone(),
                    physical_id: entry.physical_id.clone(),
                    handler_count: entry.handlers.len(),
                    once: entry.once,
                })
            })
            .collect()
    }
}
