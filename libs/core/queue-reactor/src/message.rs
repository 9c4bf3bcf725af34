//! Broker-neutral message envelope.
//!
//! Adapters translate their native frames into [`Message`]; handlers only ever
//! see this type. Bodies stay raw bytes, decoding is up to the handler.

use crate::error::ReactorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use uuid::Uuid;

/// Well-known header keys.
///
/// Lookups are case-insensitive and accept both `snake_case` and the
/// `x-kebab-case` spelling common on HTTP-bridged brokers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum HeaderKey {
    /// Correlation id linking a conversation across services.
    CorrelationId,
    /// Id of the originating request.
    RequestId,
    /// Identity of the user on whose behalf the message was sent.
    UserId,
}

impl HeaderKey {
    /// All header keys.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }

    fn matches(&self, name: &str) -> bool {
        let snake = self.as_ref();
        let kebab = format!("x-{}", snake.replace('_', "-"));
        name.eq_ignore_ascii_case(snake) || name.eq_ignore_ascii_case(&kebab)
    }
}

/// A message received from or sent to a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Broker message id (generated when the broker does not provide one)
    pub id: String,

    /// Raw payload
    pub body: Vec<u8>,

    /// Transport headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Destination replies to this message should be sent to
    #[serde(default)]
    pub reply_to: Option<String>,

    /// Correlation id set by the broker or the sender
    #[serde(default)]
    pub correlation_id: Option<String>,

    /// When the message was created
    pub timestamp: DateTime<Utc>,

    /// Number of times the broker delivered this message
    #[serde(default = "default_delivery_count")]
    pub delivery_count: u32,
}

fn default_delivery_count() -> u32 {
    1
}

impl Message {
    /// Create a message with a fresh id
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            body: body.into(),
            headers: HashMap::new(),
            reply_to: None,
            correlation_id: None,
            timestamp: Utc::now(),
            delivery_count: 1,
        }
    }

    /// Create a message carrying the JSON encoding of `value`
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ReactorError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| ReactorError::Internal(format!("failed to encode message body: {e}")))?;
        Ok(Self::new(body))
    }

    /// Set the message id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the reply destination
    pub fn with_reply_to(mut self, destination: impl Into<String>) -> Self {
        self.reply_to = Some(destination.into());
        self
    }

    /// Set the correlation id
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the delivery count
    pub fn with_delivery_count(mut self, delivery_count: u32) -> Self {
        self.delivery_count = delivery_count;
        self
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Result<&str, ReactorError> {
        std::str::from_utf8(&self.body)
            .map_err(|e| ReactorError::handler(format!("message body is not UTF-8: {e}")))
    }

    /// Decode the body as JSON
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ReactorError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Raw header lookup (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Well-known header lookup
    pub fn known_header(&self, key: HeaderKey) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| key.matches(name))
            .map(|(_, value)| value.as_str())
    }

    /// Correlation id from the envelope, falling back to the header
    pub fn effective_correlation_id(&self) -> Option<&str> {
        self.correlation_id
            .as_deref()
            .or_else(|| self.known_header(HeaderKey::CorrelationId))
    }

    /// Check if this is a redelivery
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    /// Get age in milliseconds
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}
