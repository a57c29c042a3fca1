//! Queue worker for webhook entity reconciliation.
//!
//! Takes queued [`reconcile::NotificationPayload`]s and reconciles them
//! against the content store, keyed by the external UUID each notification
//! carries.
//!
//! Control flow for one item:
//!
//! ```text
//! QueueRunner ──claim──▶ NotificationProcessor ──▶ UuidLookup ──▶ ContentStore
//!                               │
//!                               └──────▶ EntityCrud (CrudManager) ──▶ ContentStore
//! ```
//!
//! ## Architectural Layer
//!
//! **Application.** Depends on the port traits in [`reconcile`] only; the
//! storage adapters are chosen by the binary that wires this crate up.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`lookup`] | [`UuidLookup`] |
//! | [`crud`] | [`EntityCrud`], [`CrudManager`], [`map_field_data`] |
//! | [`processor`] | [`NotificationProcessor`], [`ProcessOutcome`], [`ProcessError`] |
//! | [`runner`] | [`QueueRunner`], [`RunSummary`] |
//!
//! ## Concurrency
//!
//! Items are processed one at a time. There is no per-uuid locking: two
//! creates for the same uuid racing through separate runners can both pass
//! the lookup and produce a duplicate, which [`UuidLookup`] later reports.

pub mod crud;
pub mod lookup;
pub mod processor;
pub mod runner;

pub use crud::{map_field_data, CrudError, CrudManager, EntityCrud};
pub use lookup::UuidLookup;
pub use processor::{NotificationProcessor, ProcessError, ProcessOutcome};
pub use runner::{QueueRunner, RunSummary, DEFAULT_RUN_INTERVAL, DEFAULT_TIME_BUDGET};
