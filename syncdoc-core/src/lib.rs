//! # syncdoc-core — Shared building blocks for the syncdoc store
//!
//! Leaf types used by every storage layer: the [`Document`] contract,
//! logical time, cooperative cancellation and the CRDT collaborator that
//! backs each stored document.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   from / update   ┌──────────────┐
//! │  Document T  │ ─────────────────► │   Crdt<T>    │
//! │ (serde type) │ ◄───────────────── │ (yrs Doc)    │
//! └──────────────┘      snapshot      └──────┬───────┘
//!                                            │ CrdtDiff (v1 update)
//!                                            ▼
//!                                    ┌───────────────┐
//!                                    │ remote replica│
//!                                    └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`crdt`] — yrs-backed field-level CRDT wrapper and diff type
//! - [`time`] — `Timestamp` and the `Clock` abstraction
//! - [`context`] — cancellation scopes passed to every async operation

pub mod context;
pub mod crdt;
pub mod time;

pub use context::{Cancelled, Context};
pub use crdt::{Crdt, CrdtDiff, CrdtError};
pub use time::{Clock, ManualClock, SystemClock, Timestamp};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Serialized name of the identifier field.
pub const ID_FIELD: &str = "id";
/// Serialized name of the creation timestamp field.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Serialized name of the modification timestamp field.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// A storable document.
///
/// Implementors serialize to a JSON object carrying at least `id`,
/// `createdAt` and `updatedAt`. Every top-level field becomes one CRDT
/// register, so concurrent edits to different fields merge cleanly.
pub trait Document: Serialize + DeserializeOwned + Clone + PartialEq {
    fn id(&self) -> Uuid;
    fn created_at(&self) -> Timestamp;
    fn updated_at(&self) -> Timestamp;
    fn set_created_at(&mut self, at: Timestamp);
    fn set_updated_at(&mut self, at: Timestamp);
}
