//! Storage adapters for webhook entity reconciliation.
//!
//! Implements every port trait defined in the [`reconcile`] crate, each in an
//! in-memory flavour (tests, local experiments) and a file-backed flavour used
//! by the `webhook-entities` binary:
//!
//! | Port | In-memory | File-backed |
//! |------|-----------|-------------|
//! | [`reconcile::ContentStore`] | [`MemoryContentStore`] | [`JsonFileContentStore`] |
//! | [`reconcile::WorkQueue`] | [`MemoryQueue`] | [`SpoolQueue`] |
//! | [`reconcile::DeadLetterQueue`] | [`MemoryDeadLetterQueue`] | [`SpoolDeadLetters`] |
//! | [`reconcile::SettingsStore`] | [`StaticSettings`] | [`FileSettings`] |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** File layout, atomic writes, and I/O error mapping live
//! here. The worker and the listener see only the port traits.
//!
//! The file-backed content store and work queue cache or lease state per
//! handle, so each takes an exclusive lock file when opened; a second owner of
//! the same data fails fast with a `Locked` error.

mod content;
mod lock;
mod queue;
mod settings;
mod spool;

pub use content::{JsonFileContentStore, MemoryContentStore};
pub use queue::{MemoryDeadLetterQueue, MemoryQueue};
pub use settings::{FileSettings, StaticSettings, WebhookSettings};
pub use spool::{SpoolDeadLetters, SpoolQueue};
