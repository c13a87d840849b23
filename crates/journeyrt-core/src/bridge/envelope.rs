//! Bridge message envelopes.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::SDK_VERSION;
use crate::events;

/// Bridge protocol version stamped into every outbound envelope.
pub const BRIDGE_VERSION: &str = "1.1";

/// Envelope kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Fire-and-forget notification.
    Event,
    /// Page-initiated request expecting a response.
    Request,
    /// Native response to a page request.
    Response,
}

/// Message received from the hosted page.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Envelope kind; pages send `event` and `request`.
    pub kind: MessageKind,
    /// Event or method name.
    pub name: String,
    /// Correlation identifier echoed back on responses.
    #[serde(default)]
    pub id: Option<Value>,
    /// Message payload.
    #[serde(default)]
    pub payload: Value,
}

/// Metadata attached to every outbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    /// Per-message nonce.
    pub nonce: String,
    /// Bridge protocol version.
    pub bridge_version: String,
    /// Runtime version.
    pub sdk_version: String,
    /// W3C trace context identifier.
    pub traceparent: String,
}

impl MessageMeta {
    /// Creates metadata for one outbound envelope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            nonce: Uuid::new_v4().to_string(),
            bridge_version: BRIDGE_VERSION.to_string(),
            sdk_version: SDK_VERSION.to_string(),
            traceparent: events::new_traceparent(),
        }
    }
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Message delivered to the hosted page.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    /// Envelope kind.
    pub kind: MessageKind,
    /// Event or method name.
    pub name: String,
    /// Echoed request identifier, present on responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Message payload.
    pub payload: Value,
    /// Envelope metadata.
    pub meta: MessageMeta,
    /// ES256 JWS over the canonical `{name, payload, meta}`, present iff
    /// a signer is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}
