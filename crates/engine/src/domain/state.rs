//! Connection States and Wait Ids

use std::fmt;

/// Lifecycle state of the logical connection.
///
/// Exactly one state is active at a time; the machine is cyclic and
/// only stops in `Finalising`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    SocketOpening,
    AuthFetch,
    AuthUpdate,
    Online,
    SocketClosing,
    ReconnectDelay,
    Finalising,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::SocketOpening => "SocketOpening",
            ConnectionState::AuthFetch => "AuthFetch",
            ConnectionState::AuthUpdate => "AuthUpdate",
            ConnectionState::Online => "Online",
            ConnectionState::SocketClosing => "SocketClosing",
            ConnectionState::ReconnectDelay => "ReconnectDelay",
            ConnectionState::Finalising => "Finalising",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one attempt at a cancellable asynchronous operation
/// (socket open, socket close, auth exchange, reconnect delay).
///
/// Completions carry the wait id they were started with; a completion
/// whose wait id is no longer the active one is stale and must be
/// discarded. This generation-counter discipline is the engine's sole
/// ordering and cancellation mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(pub u64);

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic wait id source
#[derive(Debug)]
pub struct WaitIdAllocator {
    next: u64,
}

impl Default for WaitIdAllocator {
    fn default() -> Self {
        WaitIdAllocator::new()
    }
}

impl WaitIdAllocator {
    pub fn new() -> Self {
        WaitIdAllocator { next: 1 }
    }

    pub fn next(&mut self) -> WaitId {
        let id = WaitId(self.next);
        self.next += 1;
        id
    }
}

/// Why a reconnection was initiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    UnexpectedSocketClose,
    AuthExpired,
}

impl ReconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconnectReason::UnexpectedSocketClose => "unexpected socket close",
            ReconnectReason::AuthExpired => "auth expired",
        }
    }
}

impl fmt::Display for ReconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
