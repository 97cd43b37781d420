//! Domain Layer
//!
//! Connection lifecycle vocabulary: states, wait ids, failure
//! counters, the backoff table and the outbound message types. No
//! infrastructure dependencies.

pub mod backoff;
pub mod messages;
pub mod metrics;
pub mod state;
pub mod subscription;

pub use backoff::reconnect_delay;
pub use messages::{FeedMessage, LogLevel};
pub use metrics::{ConnectionMetrics, CountersSnapshot, SubscriptionErrorCounters};
pub use state::{ConnectionState, ReconnectReason, WaitId, WaitIdAllocator};
pub use subscription::{
    DataDefinition, DataItemId, FeedDefinition, SubscriptionHandle, SubscriptionStatus,
};
