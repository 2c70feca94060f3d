//! # `MessageEnvelope`
//!
//! The wrapper every event travels in between publisher and listener.
//!
//! ## Properties
//!
//! - **Opaque payload**: bytes, JSON-encoded events in practice.
//! - **Headers table**: string map carried verbatim by the broker, including
//!   across dead-lettering. Holds `idempotency-key` and the retry record.
//! - **Immutability**: fields are private. `with_retry_count` returns a new
//!   envelope for re-publishing; nothing mutates a received envelope.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Header carrying the caller-supplied idempotency key.
pub const HEADER_IDEMPOTENCY_KEY: &str = "idempotency-key";

/// Header carrying the number of failed processing attempts so far.
pub const HEADER_RETRY_COUNT: &str = "x-retry-count";

/// Header carrying the retry bound the message was scheduled under.
pub const HEADER_MAX_RETRIES: &str = "x-max-retries";

/// Header carrying the routing key the message was first published with.
pub const HEADER_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";

/// Header carrying the event type name.
pub const HEADER_EVENT_TYPE: &str = "x-event-type";

/// Header set by the broker when it dead-letters a message (`rejected`/`expired`).
pub const HEADER_DEATH_REASON: &str = "x-death-reason";

/// Header set by the broker naming the queue a message was dead-lettered from.
pub const HEADER_DEATH_QUEUE: &str = "x-death-queue";

/// Whether `name` belongs to the delivery machinery rather than the caller:
/// any `x-` header and the idempotency key.
#[must_use]
pub fn is_reserved_header(name: &str) -> bool {
    name.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("x-"))
        || name.eq_ignore_ascii_case(HEADER_IDEMPOTENCY_KEY)
}

/// Content type of JSON-encoded events.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A message as published to and delivered from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    payload: Vec<u8>,
    content_type: String,
    headers: BTreeMap<String, String>,
    correlation_id: Option<String>,
    message_id: Uuid,
    persistent: bool,
    published_at: u64,
}

impl MessageEnvelope {
    /// Create an envelope around a raw payload with a fresh message id.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            headers: BTreeMap::new(),
            correlation_id: None,
            message_id: Uuid::new_v4(),
            persistent: false,
            published_at: now_millis(),
        }
    }

    /// Rebuild an envelope from fields received off the wire.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        payload: Vec<u8>,
        content_type: Option<String>,
        headers: BTreeMap<String, String>,
        correlation_id: Option<String>,
        message_id: Option<Uuid>,
        persistent: bool,
        published_at: Option<u64>,
    ) -> Self {
        Self {
            payload,
            content_type: content_type.unwrap_or_else(|| CONTENT_TYPE_JSON.to_string()),
            headers,
            correlation_id,
            message_id: message_id.unwrap_or_else(Uuid::new_v4),
            persistent,
            published_at: published_at.unwrap_or_else(now_millis),
        }
    }

    // =========================================================================
    // CONSTRUCTION (consuming builders, used before publish)
    // =========================================================================

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_idempotency_key(self, key: impl Into<String>) -> Self {
        self.with_header(HEADER_IDEMPOTENCY_KEY, key)
    }

    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    #[must_use]
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Derive the envelope the retry pipeline re-publishes: identical except
    /// for `x-retry-count`. The original routing key is recorded if it is not
    /// already present.
    #[must_use]
    pub fn with_retry_count(&self, retry_count: u32, original_routing_key: &str) -> Self {
        let mut next = self.clone();
        next.headers
            .insert(HEADER_RETRY_COUNT.to_string(), retry_count.to_string());
        next.headers
            .entry(HEADER_ORIGINAL_ROUTING_KEY.to_string())
            .or_insert_with(|| original_routing_key.to_string());
        next
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// The idempotency key, if the publisher supplied a non-empty one.
    #[must_use]
    pub fn idempotency_key(&self) -> Option<&str> {
        self.header(HEADER_IDEMPOTENCY_KEY)
            .filter(|key| !key.trim().is_empty())
    }

    #[must_use]
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    #[must_use]
    pub fn published_at(&self) -> u64 {
        self.published_at
    }

    /// Retry metadata carried in the headers.
    #[must_use]
    pub fn retry_record(&self) -> RetryRecord {
        RetryRecord::from_headers(&self.headers)
    }

    /// Shorthand for `retry_record().retry_count`.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_record().retry_count
    }
}

/// Retry metadata implied by the headers.
///
/// Invariant: `0 <= retry_count <= max_retries` for every envelope the
/// retry pipeline itself produces. Missing or unparsable headers read as
/// "never retried".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub retry_count: u32,
    pub max_retries: Option<u32>,
    pub original_routing_key: Option<String>,
}

impl RetryRecord {
    fn from_headers(headers: &BTreeMap<String, String>) -> Self {
        let parse = |key: &str| headers.get(key).and_then(|v| v.trim().parse::<u32>().ok());
        Self {
            retry_count: parse(HEADER_RETRY_COUNT).unwrap_or(0),
            max_retries: parse(HEADER_MAX_RETRIES),
            original_routing_key: headers.get(HEADER_ORIGINAL_ROUTING_KEY).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_envelope_has_no_retry_history() {
        let envelope = MessageEnvelope::new(b"{}".to_vec());
        assert_eq!(envelope.retry_count(), 0);
        assert_eq!(envelope.retry_record(), RetryRecord::default());
        assert_eq!(envelope.content_type(), CONTENT_TYPE_JSON);
    }

    #[test]
    fn test_with_retry_count_leaves_original_untouched() {
        let original = MessageEnvelope::new(b"{}".to_vec()).with_idempotency_key("k-1");
        let retried = original.with_retry_count(2, "cart.created");

        assert_eq!(original.retry_count(), 0);
        assert_eq!(retried.retry_count(), 2);
        assert_eq!(retried.message_id(), original.message_id());
        assert_eq!(retried.idempotency_key(), Some("k-1"));
        assert_eq!(
            retried.retry_record().original_routing_key.as_deref(),
            Some("cart.created")
        );
    }

    #[test]
    fn test_original_routing_key_kept_across_retries() {
        let first = MessageEnvelope::new(b"{}".to_vec()).with_retry_count(1, "cart.created");
        let second = first.with_retry_count(2, "retry");
        assert_eq!(
            second.header(HEADER_ORIGINAL_ROUTING_KEY),
            Some("cart.created")
        );
    }

    #[test]
    fn test_reserved_headers() {
        assert!(is_reserved_header(HEADER_RETRY_COUNT));
        assert!(is_reserved_header("X-Death-Reason"));
        assert!(is_reserved_header(HEADER_IDEMPOTENCY_KEY));
        assert!(!is_reserved_header("tenant"));
        assert!(!is_reserved_header("é"));
    }

    #[test]
    fn test_blank_idempotency_key_is_absent() {
        let envelope = MessageEnvelope::new(b"{}".to_vec()).with_idempotency_key("  ");
        assert_eq!(envelope.idempotency_key(), None);
    }

    #[test]
    fn test_garbage_retry_header_reads_as_zero() {
        let envelope = MessageEnvelope::new(b"{}".to_vec()).with_header(HEADER_RETRY_COUNT, "abc");
        assert_eq!(envelope.retry_count(), 0);
    }
}
