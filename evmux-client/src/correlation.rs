//! Request correlation
//!
//! Every `eth_subscribe` / `eth_unsubscribe` we send carries a numeric id
//! drawn from a monotonic counter. The table remembers what each id was for
//! until the matching response arrives:
//!
//! 1. **Issue**: allocate the next id and record the pending call
//! 2. **Send**: the request goes out with that id
//! 3. **Take**: the response's id is looked up and the entry removed
//!
//! Ids keep growing across reconnects, so a response can never be matched
//! to a call made on a different connection. Pending calls are dropped when
//! the connection is lost; their responses can no longer arrive.

use crate::subscription::VirtualId;
use evmux_core::PhysicalId;
use std::collections::HashMap;

/// What a pending request was for
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PendingCall {
    /// `eth_subscribe` on behalf of a logical subscription
    Subscribe { virtual_id: VirtualId },
    /// `eth_unsubscribe` of a server-side subscription
    Unsubscribe { physical_id: PhysicalId },
}

/// Outstanding requests keyed by request id
#[derive(Debug)]
pub(crate) struct CorrelationTable {
    next_id: u64,
    pending: HashMap<u64, PendingCall>,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate a request id for `call`
    pub(crate) fn issue(&mut self, call: PendingCall) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id, call);
        id
    }

    /// Remove and return the call a response belongs to
    pub(crate) fn take(&mut self, id: u64) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Forget every outstanding call, returning how many there were
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
