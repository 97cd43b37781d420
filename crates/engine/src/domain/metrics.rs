//! Connection and Subscription Counters
//!
//! Owned by the state machine and multiplexer respectively; everyone
//! else sees read-only snapshots through the message queue.

use serde::Serialize;

/// Successive-failure counters for the connection lifecycle.
///
/// Each counter resets to zero on the corresponding success and is
/// the sole input to backoff-delay selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub auth_fetch_failures: u32,
    pub socket_open_failures: u32,
    pub token_fetch_failures: u32,
}

impl ConnectionMetrics {
    pub fn reset(&mut self) {
        *self = ConnectionMetrics::default();
    }

    pub fn record_auth_fetch_failure(&mut self) {
        self.auth_fetch_failures += 1;
    }

    pub fn record_auth_fetch_success(&mut self) {
        self.auth_fetch_failures = 0;
    }

    pub fn record_socket_open_failure(&mut self) {
        self.socket_open_failures += 1;
    }

    pub fn record_socket_open_success(&mut self) {
        self.socket_open_failures = 0;
    }

    pub fn record_token_fetch_failure(&mut self) {
        self.token_fetch_failures += 1;
    }

    pub fn record_token_fetch_success(&mut self) {
        self.token_fetch_failures = 0;
    }
}

/// Per-subscription error counters.
///
/// Diagnostic only: these never feed back into the connection state
/// machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubscriptionErrorCounters {
    /// Engine bug detected while handling a subscription
    pub internal: u32,
    /// Request exceeded the response timeout
    pub request_timeout: u32,
    /// Request abandoned because the connection went offline
    pub offlined: u32,
    /// Server rejected a publish on an active subscription
    pub publish_request_error: u32,
    /// Server rejected a subscribe/unsubscribe request
    pub sub_request_error: u32,
    /// Payload could not be interpreted
    pub data_error: u32,
    /// Server reported the user is not authorised
    pub user_not_authorised: u32,
    /// Unsolicited server warning (tracked separately from errors)
    pub server_warning: u32,
}

/// Periodic snapshot placed on the outbound queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    pub connection: ConnectionMetrics,
    pub subscriptions: SubscriptionErrorCounters,
    pub active_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_reset_independently() {
        let mut metrics = ConnectionMetrics::default();
        metrics.record_auth_fetch_failure();
        metrics.record_auth_fetch_failure();
        metrics.record_socket_open_failure();

        metrics.record_auth_fetch_success();
        assert_eq!(metrics.auth_fetch_failures, 0);
        assert_eq!(metrics.socket_open_failures, 1);
    }
}
