//! Data Items and Subscription Definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Client-assigned identifier of one logical subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataItemId(String);

impl DataItemId {
    pub fn new(id: impl Into<String>) -> Self {
        DataItemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataItemId {
    fn from(id: &str) -> Self {
        DataItemId::new(id)
    }
}

/// Caller-supplied request definition for a data subscription.
///
/// The engine treats the parameters opaquely; controller and topic
/// select the server channel the subscription runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDefinition {
    pub controller: String,
    pub topic: String,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl DataDefinition {
    pub fn new(
        controller: impl Into<String>,
        topic: impl Into<String>,
        parameters: Option<Value>,
    ) -> Self {
        DataDefinition {
            controller: controller.into(),
            topic: topic.into(),
            parameters,
        }
    }
}

/// Definition attached to a subscription request.
///
/// The connection lifecycle stream itself is subscribed with
/// `Connection`; it is not multiplexed like data subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDefinition {
    Connection,
    Data(DataDefinition),
}

/// State of one registered subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Registered, nothing sent yet
    Pending,
    /// Confirmed by the server and receiving data
    Active,
    /// Invalidated by a connection loss; recovers when the
    /// connection does
    Offline,
    /// Rejected or timed out
    Error,
}

/// Handle returned to the caller from a subscribe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub data_item_id: DataItemId,
}
