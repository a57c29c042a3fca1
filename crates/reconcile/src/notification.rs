//! Decoding of queued webhook payloads into typed notifications.
//!
//! Payloads are decoded in two steps. [`decode_payload`] turns the raw bytes
//! into a [`DecodedNotification`] in which every field is optional and
//! unrecognised keys are kept in a side mapping. [`DecodedNotification::into_notification`]
//! then enforces the presence of the correlation key and strips the keys named
//! by [`IgnoredKeys`], producing the [`NotificationData`] the worker acts on.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;

use crate::{DecodeError, ExternalUuid, NotificationPayload};

/// Keys a provider is known to send that carry nothing of use here.
pub const DEFAULT_IGNORED_KEYS: [&str; 2] = ["an_unused_value", "another_unused_value"];

// ---------------------------------------------------------------------------
// Event kind
// ---------------------------------------------------------------------------

/// The lifecycle event a notification reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    /// Any other value, including a missing or `null` event (empty string).
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Create => "create",
            EventKind::Update => "update",
            EventKind::Delete => "delete",
            EventKind::Other(other) => other,
        }
    }
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Other(String::new())
    }
}

impl From<Option<String>> for EventKind {
    fn from(value: Option<String>) -> Self {
        match value.as_deref() {
            Some("create") => EventKind::Create,
            Some("update") => EventKind::Update,
            Some("delete") => EventKind::Delete,
            _ => EventKind::Other(value.unwrap_or_default()),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Ignored keys
// ---------------------------------------------------------------------------

/// Denylist of payload keys removed before a notification is acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredKeys(BTreeSet<String>);

impl IgnoredKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

impl Default for IgnoredKeys {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_KEYS)
    }
}

// ---------------------------------------------------------------------------
// Decoded forms
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WireNotification {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Result of decoding one queued payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedPayload {
    /// The payload had no content; there is nothing to process.
    Empty,
    Notification(DecodedNotification),
}

/// A decoded payload before the correlation key has been checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedNotification {
    /// `None` when the key is absent, `null`, or blank.
    pub uuid: Option<ExternalUuid>,
    pub event: EventKind,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Every key not recognised above, verbatim.
    pub extra: BTreeMap<String, Value>,
}

impl From<WireNotification> for DecodedNotification {
    fn from(wire: WireNotification) -> Self {
        Self {
            uuid: wire.uuid.and_then(ExternalUuid::new),
            event: wire.event.into(),
            title: wire.title,
            body: wire.body,
            extra: wire.extra,
        }
    }
}

impl DecodedNotification {
    /// Validates the correlation key and removes denylisted keys.
    ///
    /// Returns `None` when the notification carries no uuid.
    pub fn into_notification(self, ignored: &IgnoredKeys) -> Option<NotificationData> {
        let uuid = self.uuid?;
        let mut extra = self.extra;
        extra.retain(|key, _| !ignored.contains(key));
        Some(NotificationData {
            uuid,
            event: self.event,
            title: self.title,
            body: self.body,
            extra,
        })
    }
}

/// A notification ready for dispatch: the correlation key is present and
/// denylisted keys have been removed.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationData {
    pub uuid: ExternalUuid,
    pub event: EventKind,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Unrecognised keys that were not denylisted. Never mapped onto records.
    pub extra: BTreeMap<String, Value>,
}

impl NotificationData {
    pub fn new(uuid: ExternalUuid, event: EventKind) -> Self {
        Self {
            uuid,
            event,
            title: None,
            body: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns the title if it is present and non-empty.
    pub fn non_empty_title(&self) -> Option<&str> {
        self.title.as_deref().filter(|t| !t.is_empty())
    }

    /// Returns the body if it is present and non-empty.
    pub fn non_empty_body(&self) -> Option<&str> {
        self.body.as_deref().filter(|b| !b.is_empty())
    }
}

/// Decodes a queued payload.
///
/// A blank payload decodes to [`DecodedPayload::Empty`]. A JSON value that is
/// not an object decodes to a notification with no fields, which the worker
/// then reports as missing its uuid.
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if the payload is not JSON, or if `uuid`,
/// `event`, `title`, or `body` is present with a type other than string or `null`.
pub fn decode_payload(payload: &NotificationPayload) -> Result<DecodedPayload, DecodeError> {
    if payload.is_blank() {
        return Ok(DecodedPayload::Empty);
    }

    let value: Value = serde_json::from_slice(payload.as_bytes())?;
    if !value.is_object() {
        return Ok(DecodedPayload::Notification(DecodedNotification::default()));
    }

    let wire: WireNotification = serde_json::from_value(value)?;
    Ok(DecodedPayload::Notification(wire.into()))
}
