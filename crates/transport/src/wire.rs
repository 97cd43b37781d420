//! Wire Envelope
//!
//! Every message exchanged with the feed server is a JSON object of
//! the form `{Controller, Topic, Action, TransactionID, Data}`. The
//! transaction id correlates a response with the request that issued
//! it; `Data` is an opaque payload interpreted by the subscriber.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Action field of a wire envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireAction {
    Publish,
    Subscribe,
    Unsubscribe,
    Error,
}

/// JSON envelope shared by every message on the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "Controller")]
    pub controller: String,

    #[serde(rename = "Topic")]
    pub topic: String,

    #[serde(rename = "Action")]
    pub action: WireAction,

    /// Client-assigned correlation id; 0 for unsolicited server
    /// messages such as warnings.
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: u64,

    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireEnvelope {
    pub fn new(
        controller: impl Into<String>,
        topic: impl Into<String>,
        action: WireAction,
        transaction_id: u64,
        data: Option<Value>,
    ) -> Self {
        WireEnvelope {
            controller: controller.into(),
            topic: topic.into(),
            action,
            transaction_id,
            data,
        }
    }

    /// Whether this envelope belongs to the given channel
    pub fn is_channel(&self, controller: &str, topic: &str) -> bool {
        self.controller == controller && self.topic == topic
    }

    /// Normalize an `Error` action payload to a readable message.
    ///
    /// The server sends error detail as a plain string, as an object
    /// (with an optional `Message` field), or not at all.
    pub fn error_text(&self) -> String {
        match &self.data {
            None => "(no error detail)".to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(Value::Object(map)) => match map.get("Message") {
                Some(Value::String(text)) => text.clone(),
                _ => Value::Object(map.clone()).to_string(),
            },
            Some(other) => other.to_string(),
        }
    }

    /// Encode to the JSON text sent over the socket
    pub fn encode(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text received from the socket
    pub fn decode(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_round_trip() {
        let envelope = WireEnvelope::new(
            "Market",
            "Trades!BHP",
            WireAction::Subscribe,
            7,
            Some(json!({"Exchange": "ASX"})),
        );
        let text = envelope.encode().unwrap();
        assert!(text.contains("\"Action\":\"Subscribe\""));
        assert!(text.contains("\"TransactionID\":7"));

        let decoded = WireEnvelope::decode(&text).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_defaults_transaction_id() {
        let decoded =
            WireEnvelope::decode(r#"{"Controller":"Market","Topic":"Warning","Action":"Error"}"#)
                .unwrap();
        assert_eq!(decoded.transaction_id, 0);
        assert!(decoded.data.is_none());
    }

    #[test]
    fn test_error_text_from_string() {
        let envelope = WireEnvelope::new(
            "Market",
            "Trades!BHP",
            WireAction::Error,
            3,
            Some(json!("symbol unknown")),
        );
        assert_eq!(envelope.error_text(), "symbol unknown");
    }

    #[test]
    fn test_error_text_from_object() {
        let envelope = WireEnvelope::new(
            "Market",
            "Trades!BHP",
            WireAction::Error,
            3,
            Some(json!({"Message": "symbol unknown", "Code": 12})),
        );
        assert_eq!(envelope.error_text(), "symbol unknown");

        let no_message = WireEnvelope::new(
            "Market",
            "Trades!BHP",
            WireAction::Error,
            3,
            Some(json!({"Code": 12})),
        );
        assert_eq!(no_message.error_text(), r#"{"Code":12}"#);
    }

    #[test]
    fn test_error_text_missing_payload() {
        let envelope = WireEnvelope::new("Market", "Trades!BHP", WireAction::Error, 3, None);
        assert_eq!(envelope.error_text(), "(no error detail)");
    }
}
