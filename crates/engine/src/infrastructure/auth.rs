//! Auth Codec
//!
//! Builds the outbound identify request envelope and parses the
//! inbound identify response. A `Rejected` identify result is a
//! normal decoded outcome; [`AuthError`] covers protocol errors and
//! malformed envelopes, which the state machine treats differently.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use feedlink_transport::{WireAction, WireEnvelope};

/// Controller of the dedicated auth channel
pub const AUTH_CONTROLLER: &str = "Auth";

/// Topic of the dedicated auth channel
pub const AUTH_TOPIC: &str = "Identify";

/// Errors decoding an identify response
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("envelope is not on the auth channel: {controller}/{topic}")]
    WrongChannel { controller: String, topic: String },

    #[error("auth protocol error: {0}")]
    Protocol(String),

    #[error("identify response has no payload")]
    MissingPayload,

    #[error("malformed identify response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result field of an identify response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifyResult {
    Accepted,
    Rejected,
}

/// Decoded identify response payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    #[serde(rename = "Result")]
    pub result: IdentifyResult,

    #[serde(rename = "UserID", default)]
    pub user_id: Option<String>,

    #[serde(rename = "DisplayName", default)]
    pub display_name: Option<String>,

    /// Duration string `±HH:MM:SS.fff`; see [`parse_expires_in`]
    #[serde(rename = "ExpiresIn", default)]
    pub expires_in: Option<String>,

    #[serde(rename = "ExpiryDate", default)]
    pub expiry_date: Option<String>,

    #[serde(rename = "Scope", default)]
    pub scope: Option<String>,

    #[serde(rename = "AccessToken", default)]
    pub access_token: Option<String>,
}

impl IdentifyResponse {
    /// Absolute expiry reported by the server, when present and
    /// parsable as RFC 3339
    pub fn expiry_date_utc(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
            .as_deref()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|parsed| parsed.with_timezone(&Utc))
    }
}

/// Remaining token lifetime extracted from an identify response.
///
/// `degraded` marks an unparsable `ExpiresIn`: the exchange still
/// succeeds, but the caller counts a token-fetch failure and applies
/// the minimum allowed interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenLifetime {
    pub remaining: Duration,
    pub degraded: bool,
}

/// Build the outbound identify request envelope
pub fn encode_identify_request(
    transaction_id: u64,
    provider: &str,
    access_token: &str,
) -> WireEnvelope {
    WireEnvelope::new(
        AUTH_CONTROLLER,
        AUTH_TOPIC,
        WireAction::Publish,
        transaction_id,
        Some(json!({
            "Provider": provider,
            "AccessToken": access_token,
        })),
    )
}

/// Parse the inbound identify response envelope
pub fn decode_identify_response(envelope: &WireEnvelope) -> Result<IdentifyResponse, AuthError> {
    if !envelope.is_channel(AUTH_CONTROLLER, AUTH_TOPIC) {
        return Err(AuthError::WrongChannel {
            controller: envelope.controller.clone(),
            topic: envelope.topic.clone(),
        });
    }

    if envelope.action == WireAction::Error {
        return Err(AuthError::Protocol(envelope.error_text()));
    }

    let data = envelope.data.as_ref().ok_or(AuthError::MissingPayload)?;
    let response: IdentifyResponse = serde_json::from_value(data.clone())?;
    Ok(response)
}

/// Parse an `ExpiresIn` duration string of the form `±HH:MM:SS.fff`.
///
/// A leading `-` means the token is already expired and yields zero
/// remaining time. An unparsable value logs a warning and yields a
/// degraded zero lifetime; the caller substitutes the minimum
/// allowed interval rather than failing the exchange.
pub fn parse_expires_in(text: &str) -> TokenLifetime {
    match parse_signed_duration(text) {
        Some((negative, duration)) => TokenLifetime {
            remaining: if negative { Duration::ZERO } else { duration },
            degraded: false,
        },
        None => {
            tracing::warn!("unparsable ExpiresIn value: {:?}", text);
            TokenLifetime {
                remaining: Duration::ZERO,
                degraded: true,
            }
        }
    }
}

fn parse_signed_duration(text: &str) -> Option<(bool, Duration)> {
    let trimmed = text.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let mut parts = rest.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_part = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    let (whole, millis) = match seconds_part.split_once('.') {
        Some((whole, frac)) => {
            if frac.is_empty() || frac.len() > 3 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let frac_value: u64 = frac.parse().ok()?;
            let scale = 10u64.pow(3 - frac.len() as u32);
            (whole, frac_value * scale)
        }
        None => (seconds_part, 0),
    };
    let seconds: u64 = whole.parse().ok()?;
    if minutes >= 60 || seconds >= 60 {
        return None;
    }

    let total_millis = ((hours * 60 + minutes) * 60 + seconds) * 1_000 + millis;
    Some((negative, Duration::from_millis(total_millis)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identify_request_envelope() {
        let envelope = encode_identify_request(5, "Bearer", "token-abc");
        assert!(envelope.is_channel(AUTH_CONTROLLER, AUTH_TOPIC));
        assert_eq!(envelope.transaction_id, 5);
        let data = envelope.data.unwrap();
        assert_eq!(data["Provider"], "Bearer");
        assert_eq!(data["AccessToken"], "token-abc");
    }

    #[test]
    fn test_decode_accepted_response() {
        let envelope = WireEnvelope::new(
            AUTH_CONTROLLER,
            AUTH_TOPIC,
            WireAction::Publish,
            5,
            Some(json!({
                "Result": "Accepted",
                "UserID": "u1",
                "DisplayName": "User One",
                "ExpiresIn": "00:10:00.000",
            })),
        );
        let response = decode_identify_response(&envelope).unwrap();
        assert_eq!(response.result, IdentifyResult::Accepted);
        assert_eq!(response.user_id.as_deref(), Some("u1"));
        assert_eq!(response.expires_in.as_deref(), Some("00:10:00.000"));
    }

    #[test]
    fn test_decode_rejected_is_not_an_error() {
        let envelope = WireEnvelope::new(
            AUTH_CONTROLLER,
            AUTH_TOPIC,
            WireAction::Publish,
            5,
            Some(json!({"Result": "Rejected"})),
        );
        let response = decode_identify_response(&envelope).unwrap();
        assert_eq!(response.result, IdentifyResult::Rejected);
    }

    #[test]
    fn test_decode_wrong_channel() {
        let envelope = WireEnvelope::new("Market", "Trades", WireAction::Publish, 5, None);
        assert!(matches!(
            decode_identify_response(&envelope),
            Err(AuthError::WrongChannel { .. })
        ));
    }

    #[test]
    fn test_decode_protocol_error_normalizes_message() {
        let envelope = WireEnvelope::new(
            AUTH_CONTROLLER,
            AUTH_TOPIC,
            WireAction::Error,
            5,
            Some(json!({"Message": "service unavailable"})),
        );
        match decode_identify_response(&envelope) {
            Err(AuthError::Protocol(text)) => assert_eq!(text, "service unavailable"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_payload() {
        let envelope = WireEnvelope::new(AUTH_CONTROLLER, AUTH_TOPIC, WireAction::Publish, 5, None);
        assert!(matches!(
            decode_identify_response(&envelope),
            Err(AuthError::MissingPayload)
        ));
    }

    #[test]
    fn test_expiry_date_parsed_when_rfc3339() {
        let envelope = WireEnvelope::new(
            AUTH_CONTROLLER,
            AUTH_TOPIC,
            WireAction::Publish,
            5,
            Some(json!({
                "Result": "Accepted",
                "ExpiryDate": "2026-08-26T10:00:00Z",
            })),
        );
        let response = decode_identify_response(&envelope).unwrap();
        let expiry = response.expiry_date_utc().unwrap();
        assert_eq!(expiry.to_rfc3339(), "2026-08-26T10:00:00+00:00");

        let no_date = IdentifyResponse {
            expiry_date: Some("not a date".to_string()),
            ..response
        };
        assert!(no_date.expiry_date_utc().is_none());
    }

    #[test]
    fn test_expires_in_plain() {
        let lifetime = parse_expires_in("00:10:00.000");
        assert_eq!(lifetime.remaining, Duration::from_secs(600));
        assert!(!lifetime.degraded);
    }

    #[test]
    fn test_expires_in_fractional_and_no_fraction() {
        assert_eq!(
            parse_expires_in("01:02:03.500").remaining,
            Duration::from_millis(3_723_500)
        );
        assert_eq!(
            parse_expires_in("00:00:30").remaining,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_expires_in_negative_is_zero() {
        let lifetime = parse_expires_in("-00:05:00.000");
        assert_eq!(lifetime.remaining, Duration::ZERO);
        assert!(!lifetime.degraded);
    }

    #[test]
    fn test_expires_in_garbage_is_degraded() {
        let lifetime = parse_expires_in("garbage");
        assert_eq!(lifetime.remaining, Duration::ZERO);
        assert!(lifetime.degraded);

        assert!(parse_expires_in("00:99:00.000").degraded);
        assert!(parse_expires_in("00:10").degraded);
    }
}
