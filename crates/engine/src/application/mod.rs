//! Application Layer
//!
//! The connection state machine and the subscription multiplexer:
//! deterministic, synchronous cores driven by injected events and
//! caller-supplied instants.

pub mod error;
pub mod multiplexer;
pub mod state_machine;

pub use error::EngineError;
pub use multiplexer::{Routed, SubscriptionMultiplexer};
pub use state_machine::{ConnectionAction, ConnectionStateMachine, LifecycleEvent};
