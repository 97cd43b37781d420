//! Feedlink Engine
//!
//! Connection engine for a realtime streaming data feed: one logical
//! session to the remote service over a WebSocket, with token-based
//! authentication, proactive token refresh, adaptive reconnection
//! backoff and multiplexing of data subscriptions onto the single
//! physical connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   FeedPublisher                       │
//! │  ┌──────────────────────┐  ┌──────────────────────┐  │
//! │  │ ConnectionStateMachine│  │SubscriptionMultiplexer│ │
//! │  │ (lifecycle, backoff,  │  │ (data items, demux,  │  │
//! │  │  token refresh)       │  │  error counters)     │  │
//! │  └──────────┬───────────┘  └──────────┬───────────┘  │
//! │             │      ordered message queue │            │
//! └─────────────┼──────────────────────────┼─────────────┘
//!               │ TransportCommand         │ FeedMessage
//!               ▼                          ▼
//!        ┌─────────────┐            ┌─────────────┐
//!        │   Socket    │            │   Consumer  │
//!        └─────────────┘            └─────────────┘
//! ```
//!
//! The core is synchronous and deterministic: public calls and
//! injected transport events run to completion, timers are deadlines
//! evaluated against a caller-supplied instant, and every cancellable
//! asynchronous attempt is tagged with a wait id so stale completions
//! are discarded instead of locked against.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod presentation;

// Re-export key types
pub use domain::backoff::reconnect_delay;
pub use domain::messages::{FeedMessage, LogLevel};
pub use domain::metrics::{ConnectionMetrics, CountersSnapshot, SubscriptionErrorCounters};
pub use domain::state::{ConnectionState, ReconnectReason, WaitId};
pub use domain::subscription::{
    DataDefinition, DataItemId, FeedDefinition, SubscriptionHandle, SubscriptionStatus,
};

pub use application::error::EngineError;
pub use application::multiplexer::SubscriptionMultiplexer;
pub use application::state_machine::ConnectionStateMachine;

pub use infrastructure::auth::{
    AuthError, IdentifyResponse, IdentifyResult, TokenLifetime, decode_identify_response,
    encode_identify_request, parse_expires_in,
};
pub use infrastructure::driver::ConnectionDriver;

pub use presentation::publisher::FeedPublisher;

pub use config::{ConfigError, EngineConfig, load_config, load_default_config};

/// Close code the server reserves for session takeover
pub const CLOSE_CODE_SESSION_TAKEOVER: u16 = 4000;

/// Close reason distinguishing an expired session from a kick-off
pub const CLOSE_REASON_SESSION_EXPIRED: &str = "SessionExpired";
