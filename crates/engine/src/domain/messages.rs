//! Outbound Message Queue Types
//!
//! The caller observes connection health and receives subscription
//! data exclusively through this ordered queue; it never reads the
//! engine's internal counters directly.

use serde_json::Value;

use feedlink_transport::SocketClose;

use super::metrics::CountersSnapshot;
use super::state::{ConnectionState, ReconnectReason, WaitId};
use super::subscription::DataItemId;

/// Severity for log entries placed on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One message on the engine's outbound queue.
///
/// Ordering is append-only and preserved across drains.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The lifecycle state changed
    StateChanged {
        state: ConnectionState,
        wait_id: WaitId,
    },
    /// The connection came online or went offline; a went-offline
    /// carries the socket close that caused it
    OnlineChanged {
        online: bool,
        close: Option<SocketClose>,
    },
    /// Periodic counter snapshot
    Counters(CountersSnapshot),
    /// Diagnostic log entry
    Log { level: LogLevel, text: String },
    /// A reconnect was scheduled
    Reconnecting { reason: ReconnectReason },
    /// An endpoint was chosen for a connection attempt
    EndpointSelected { url: String },
    /// Another client took over the session; no reconnect follows
    SessionKickedOff { reason: String },
    /// Initial bookkeeping for the connection item is complete
    Synchronised { request_nr: u64 },
    /// Payload for one data subscription; `request_nr` identifies
    /// which subscribe cycle on the item the payload belongs to
    Data {
        data_item_id: DataItemId,
        request_nr: u64,
        payload: Value,
    },
    /// A per-subscription failure (diagnostic, connection unaffected)
    SubscriptionError {
        data_item_id: DataItemId,
        request_nr: u64,
        text: String,
    },
}
