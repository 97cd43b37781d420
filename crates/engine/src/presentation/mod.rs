//! Presentation Layer
//!
//! The facade the rest of the system talks to.

pub mod publisher;

pub use publisher::FeedPublisher;
