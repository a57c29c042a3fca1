//! Shared value types for the reconciliation domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the data that flows between the queue, the worker, and the content store.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::{ExternalUuid, QueueItemId, RecordId};

/// Record type stamped onto every record created from a notification.
pub const WEBHOOK_RECORD_TYPE: &str = "page";

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from microseconds since the Unix epoch.
    ///
    /// Returns `None` if the value is outside the representable range.
    pub fn from_unix_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(Self)
    }

    /// Returns microseconds since the Unix epoch.
    pub fn as_unix_micros(self) -> i64 {
        self.0.timestamp_micros()
    }

    /// Drops precision below one microsecond, the resolution of
    /// [`Timestamp::as_unix_micros`].
    pub fn truncated_to_micros(self) -> Self {
        Self(self.0.trunc_subsecs(6))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Record fields
// ---------------------------------------------------------------------------

/// Text format tag stored alongside a structured body value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    /// Restricted HTML; the format applied to notification bodies by default.
    #[default]
    BasicHtml,
    /// Unrestricted HTML.
    FullHtml,
    /// Plain text with no markup.
    PlainText,
}

impl TextFormat {
    /// Returns the tag as stored on records.
    pub fn as_str(self) -> &'static str {
        match self {
            TextFormat::BasicHtml => "basic_html",
            TextFormat::FullHtml => "full_html",
            TextFormat::PlainText => "plain_text",
        }
    }
}

impl std::fmt::Display for TextFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TextFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "basic_html" => Ok(TextFormat::BasicHtml),
            "full_html" => Ok(TextFormat::FullHtml),
            "plain_text" => Ok(TextFormat::PlainText),
            other => Err(format!("unknown text format '{other}'")),
        }
    }
}

/// A body value together with its text format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedText {
    pub value: String,
    pub format: TextFormat,
}

impl FormattedText {
    pub fn new(value: impl Into<String>, format: TextFormat) -> Self {
        Self {
            value: value.into(),
            format,
        }
    }
}

/// Store field values derived from one notification.
///
/// Only non-empty inputs are carried; an absent field means "nothing to write".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    pub title: Option<String>,
    pub body: Option<FormattedText>,
}

/// The properties a content store can match on with an equality lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordField {
    /// The external correlation key.
    WebhookUuid,
}

impl RecordField {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordField::WebhookUuid => "webhook_uuid",
        }
    }
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The persisted local representation of a remote entity.
///
/// At most one record exists per [`ExternalUuid`]; the uuid never changes
/// once the record has been created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRecord {
    pub id: RecordId,
    pub uuid: ExternalUuid,
    pub record_type: String,
    /// `None` or empty means the field was never set.
    pub title: Option<String>,
    pub body: Option<FormattedText>,
    pub created: Timestamp,
    pub changed: Timestamp,
}

impl LocalRecord {
    /// Returns `true` if the record has a non-empty title.
    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Returns `true` if the record has a non-empty body value.
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.value.is_empty())
    }

    /// Returns the value of `field` for equality lookups.
    pub fn field_value(&self, field: RecordField) -> Option<&str> {
        match field {
            RecordField::WebhookUuid => Some(self.uuid.as_str()),
        }
    }
}

/// Values for a record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub uuid: ExternalUuid,
    pub record_type: String,
    pub title: String,
    pub body: Option<FormattedText>,
}

// ---------------------------------------------------------------------------
// Queue payloads
// ---------------------------------------------------------------------------

/// The raw request body of a webhook call, queued without inspection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NotificationPayload(Vec<u8>);

impl NotificationPayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if the payload has no content worth decoding.
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(u8::is_ascii_whitespace)
    }
}

impl From<Vec<u8>> for NotificationPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for NotificationPayload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub id: QueueItemId,
    pub payload: NotificationPayload,
    pub enqueued_at: Timestamp,
}

impl QueueItem {
    /// Wraps `payload` in a freshly identified item stamped with the current time.
    pub fn new(payload: NotificationPayload) -> Self {
        Self {
            id: QueueItemId::new_random(),
            payload,
            enqueued_at: Timestamp::now().truncated_to_micros(),
        }
    }
}

/// A queue item that failed permanently, kept for inspection and replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub item: QueueItem,
    pub reason: String,
    pub dead_lettered_at: Timestamp,
}
