//! Core domain for webhook entity reconciliation.
//!
//! This crate contains the identifiers, value types, payload decoding, and
//! error taxonomy shared by every other crate in the workspace, together with
//! the port traits that infrastructure crates implement.
//!
//! ## Architectural Layer
//!
//! **Business types + port definitions.** This crate has no I/O dependencies.
//! It defines *what* the worker and the listener need; the `storage` and
//! `listener` crates define *how* it is supplied.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ExternalUuid`, `RecordId`, `QueueItemId`) |
//! | [`types`] | Records, field values, payloads, queue items |
//! | [`notification`] | Payload decoding, event kinds, the ignored-key denylist |
//! | [`errors`] | Per-port error types and the retry policy |
//! | [`ports`] | `ContentStore`, `WorkQueue`, `DeadLetterQueue`, `SettingsStore` |

pub mod errors;
pub mod identifiers;
pub mod notification;
pub mod ports;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{DecodeError, QueueError, RetryPolicy, SettingsError, StoreError};
pub use identifiers::{ExternalUuid, QueueItemId, RecordId};
pub use notification::{
    decode_payload, DecodedNotification, DecodedPayload, EventKind, IgnoredKeys,
    NotificationData, DEFAULT_IGNORED_KEYS,
};
pub use ports::{ContentStore, DeadLetterQueue, SettingsStore, WorkQueue};
pub use types::{
    DeadLetter, FieldValues, FormattedText, LocalRecord, NewRecord, NotificationPayload,
    QueueItem, RecordField, TextFormat, Timestamp, WEBHOOK_RECORD_TYPE,
};
