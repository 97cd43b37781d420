//! Transport Crate
//!
//! Thin layer between the connection engine and the remote feed
//! server: a JSON wire envelope shared by every message on the
//! session, and an asynchronous WebSocket wrapper driven by commands
//! and reporting events over channels.
//!
//! ```text
//! ┌────────────────┐  TransportCommand   ┌────────────────┐
//! │   Connection   │ ──────────────────► │     Socket     │
//! │     Engine     │                     │  (WebSocket)   │
//! │                │ ◄────────────────── │                │
//! └────────────────┘  TransportEvent     └────────────────┘
//! ```
//!
//! Open and close commands carry the engine's wait id so that the
//! completion event for a superseded attempt can be recognised and
//! discarded by the caller.

pub mod error;
pub mod socket;
pub mod wire;

pub use error::TransportError;
pub use socket::{ReadyState, Socket, SocketClose, TransportCommand, TransportEvent};
pub use wire::{WireAction, WireEnvelope};
