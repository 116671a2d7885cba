//! Metric names and descriptions
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use metrics::{describe_counter, describe_histogram, histogram};
use std::time::Instant;

pub const LEDGER_APPENDS: &str = "relay.ledger.appends";
pub const LEDGER_APPEND_DURATION_MS: &str = "relay.ledger.append.duration_ms";
pub const REGISTRY_MEMBERS_ADDED: &str = "relay.registry.members_added";
pub const CONNECTIONS_ACCEPTED: &str = "relay.connections.accepted";
pub const SESSIONS_REJECTED: &str = "relay.sessions.rejected";
pub const ACTIONS_TOTAL: &str = "relay.actions.total";
pub const ACTIONS_INVALID: &str = "relay.actions.invalid";
pub const ACTIONS_FAILED: &str = "relay.actions.failed";
pub const ACTION_DURATION_MS: &str = "relay.action.duration_ms";

/// Register descriptions for every relay metric
pub fn init_metrics() {
    describe_counter!(LEDGER_APPENDS, "Message blocks appended to the ledger");
    describe_histogram!(
        LEDGER_APPEND_DURATION_MS,
        "Ledger append duration in milliseconds"
    );
    describe_counter!(
        REGISTRY_MEMBERS_ADDED,
        "New (username, key) pairs written to the registry"
    );

    describe_counter!(
        CONNECTIONS_ACCEPTED,
        "TCP connections accepted by the listener"
    );
    describe_counter!(
        SESSIONS_REJECTED,
        "Sessions closed because of a malformed request"
    );
    describe_counter!(
        ACTIONS_TOTAL,
        "Recognized actions served, labelled by action"
    );
    describe_counter!(ACTIONS_INVALID, "Unrecognized action tokens");
    describe_counter!(
        ACTIONS_FAILED,
        "Actions answered with the generic failure reply"
    );
    describe_histogram!(
        ACTION_DURATION_MS,
        "Action handling duration in milliseconds"
    );
}

/// Records elapsed milliseconds into a histogram when stopped
pub struct Timer {
    name: &'static str,
    action: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str, action: &'static str) -> Self {
        Self {
            name,
            action,
            start: Instant::now(),
        }
    }

    pub fn stop(self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name, "action" => self.action)
            .record(elapsed_ms);
    }
}
