//! Engine Error Types

use thiserror::Error;

use crate::domain::subscription::DataItemId;

/// Error type for engine operations.
///
/// `Fatal` marks a programming-invariant violation inside the engine
/// (a hook fired twice, a completion in an impossible state). It is
/// never retried: the operation aborts and the caller decides whether
/// to tear the engine down. Every other variant is a recoverable
/// caller mistake.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Internal invariant violated; indicates an engine bug
    #[error("fatal engine error: {0}")]
    Fatal(String),

    /// Definition payload does not fit the operation
    #[error("invalid definition: {0}")]
    InvalidDefinition(&'static str),

    /// `connect` called while a connection item is already bound
    #[error("already connected")]
    AlreadyConnected,

    /// A subscription already exists for this data item
    #[error("duplicate data item: {0}")]
    DuplicateDataItem(DataItemId),

    /// No subscription exists for this data item
    #[error("unknown data item: {0}")]
    UnknownDataItem(DataItemId),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}
