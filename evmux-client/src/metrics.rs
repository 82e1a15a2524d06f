//! Client metrics
//!
//! OpenTelemetry instruments recorded by the multiplexer when observability
//! is enabled through `ClientBuilder::with_observability()`.
//!
//! # Metrics Collected
//!
//! - **evmux.client.connection.state**: current controller state (gauge)
//! - **evmux.client.subscriptions.active**: live logical subscriptions (gauge)
//! - **evmux.client.notifications.routed**: pushes delivered to a subscription (counter)
//! - **evmux.client.notifications.dropped**: pushes with no matching subscription (counter)
//! - **evmux.client.handler.panics**: handler invocations that panicked (counter)
//! - **evmux.client.reconnection.attempts** / **.success**: reconnect cycle (counters)
//! - **evmux.client.resubscribe.size**: entries re-issued per reconnect (histogram)
//! - **evmux.client.errors.total**: errors by kind (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use evmux_client::ClientMetrics;
//!
//! let metrics = ClientMetrics::new("block-indexer");
//! metrics.record_notification("newHeads");
//! ```

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// OpenTelemetry instruments for one client
pub struct ClientMetrics {
    /// Controller state, see [`ClientMetrics::state_code`]
    pub connection_state: Gauge<i64>,
    /// Number of registered logical subscriptions
    pub active_subscriptions: Gauge<i64>,
    /// Notifications delivered, by event type
    pub notifications_routed: Counter<u64>,
    /// Notifications dropped, by reason
    pub notifications_dropped: Counter<u64>,
    /// Panicking handler invocations
    pub handler_panics: Counter<u64>,
    /// Connection attempts after the first
    pub reconnection_attempts: Counter<u64>,
    /// Successful reconnects
    pub reconnection_success: Counter<u64>,
    /// Subscriptions re-issued per successful reconnect
    pub resubscribe_size: Histogram<u64>,
    /// Errors, by kind
    pub errors_total: Counter<u64>,
}

impl ClientMetrics {
    /// Instruments on the global meter provider, scoped to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-provided meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("evmux.client.connection.state")
                .with_description(
                    "Connection state (0=disconnected, 1=connecting, 2=connected, 3=failed, 4=closed)",
                )
                .build(),
            active_subscriptions: meter
                .i64_gauge("evmux.client.subscriptions.active")
                .with_description("Number of registered logical subscriptions")
                .build(),
            notifications_routed: meter
                .u64_counter("evmux.client.notifications.routed")
                .with_description("Notifications delivered to a subscription")
                .build(),
            notifications_dropped: meter
                .u64_counter("evmux.client.notifications.dropped")
                .with_description("Notifications that matched no subscription")
                .build(),
            handler_panics: meter
                .u64_counter("evmux.client.handler.panics")
                .with_description("Handler invocations that panicked")
                .build(),
            reconnection_attempts: meter
                .u64_counter("evmux.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("evmux.client.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
            resubscribe_size: meter
                .u64_histogram("evmux.client.resubscribe.size")
                .with_description("Subscriptions re-issued after a reconnect")
                .build(),
            errors_total: meter
                .u64_counter("evmux.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
        }
    }

    /// Gauge value for a controller state
    pub fn state_code(state: &ConnectionState) -> i64 {
        match state {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting { .. } => 1,
            ConnectionState::Connected => 2,
            ConnectionState::Failed { .. } => 3,
            ConnectionState::Closed => 4,
        }
    }

    /// Record the controller state
    pub fn update_connection_state(&self, state: &ConnectionState) {
        self.connection_state.record(Self::state_code(state), &[]);
    }

    /// Record the number of registered subscriptions
    pub fn update_active_subscriptions(&self, count: usize) {
        self.active_subscriptions.record(count as i64, &[]);
    }

    /// Record a delivered notification
    pub fn record_notification(&self, event_type: &str) {
        let attributes = &[KeyValue::new("event_type", event_type.to_string())];
        self.notifications_routed.add(1, attributes);
    }

    /// Record a dropped notification
    pub fn record_dropped(&self, reason: &'static str) {
        self.notifications_dropped
            .add(1, &[KeyValue::new("reason", reason)]);
    }

    /// Record a panicking handler
    pub fn record_handler_panic(&self, event_type: &str) {
        let attributes = &[KeyValue::new("event_type", event_type.to_string())];
        self.handler_panics.add(1, attributes);
    }

    /// Record a reconnection attempt
    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    /// Record a successful reconnection and the size of the resubscribe pass
    pub fn record_reconnection_success(&self, resubscribed: usize) {
        self.reconnection_success.add(1, &[]);
        self.resubscribe_size.record(resubscribed as u64, &[]);
    }

    /// Record an error
    pub fn record_error(&self, error_type: &'static str) {
        self.errors_total
            .add(1, &[KeyValue::new("error_type", error_type)]);
    }
}
