use crate::payload::InboundPayload;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde_json::Value;
use std::net::IpAddr;

pub const RECEIVED_AT_FIELD: &str = "heroku_received_at";
pub const TIMESTAMP_FIELD: &str = "heroku_timestamp";
pub const CLIENT_IP_FIELD: &str = "client_ip";

/// Every field [`ReceiptMetadata::apply`] writes.
pub const RECEIPT_FIELDS: [&str; 3] = [RECEIVED_AT_FIELD, TIMESTAMP_FIELD, CLIENT_IP_FIELD];

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

/// When and from where a webhook was received.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptMetadata {
    received_at: DateTime<Utc>,
    client_ip: String,
}

impl ReceiptMetadata {
    pub fn new(received_at: DateTime<Utc>, client_ip: impl Into<String>) -> Self {
        Self {
            received_at,
            client_ip: client_ip.into(),
        }
    }

    /// Receipt metadata for a request arriving now.
    pub fn capture(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        Self::new(Utc::now(), resolve_client_ip(headers, peer))
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn formatted_timestamp(&self) -> String {
        self.received_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }

    /// Writes the receipt fields into `payload`, replacing any fields of the
    /// same name the sender supplied.
    pub fn apply(&self, payload: &mut InboundPayload) {
        payload.insert(
            RECEIVED_AT_FIELD.into(),
            Value::from(epoch_secs(self.received_at)),
        );
        payload.insert(
            TIMESTAMP_FIELD.into(),
            Value::String(self.formatted_timestamp()),
        );
        payload.insert(CLIENT_IP_FIELD.into(), Value::String(self.client_ip.clone()));
    }
}

/// Seconds since the Unix epoch with sub-second precision.
pub fn epoch_secs(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

/// Prefers `X-Forwarded-For`, as set by the hosting router, over the
/// transport peer address. The header is kept verbatim, proxy chain included.
pub fn resolve_client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (forwarded, peer) {
        (Some(forwarded), _) => forwarded.to_string(),
        (None, Some(peer)) => peer.to_string(),
        (None, None) => UNKNOWN_CLIENT.to_string(),
    }
}
