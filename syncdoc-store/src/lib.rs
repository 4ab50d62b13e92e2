//! # syncdoc-store — Transactional indexed document store
//!
//! Documents are stored as CRDT state in an ordered key-value
//! transaction, with secondary indexes maintained in the same
//! transaction and remote diffs merged through a field-level write check.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  create/update/apply  ┌──────────────┐
//! │   caller     │ ────────────────────► │   DocRepo    │
//! └──────────────┘                       └──────┬───────┘
//!                                    ┌──────────┼───────────┐
//!                                    ▼          ▼           ▼
//!                             ┌──────────┐ ┌─────────┐ ┌───────────┐
//!                             │ primary  │ │ Index × │ │OnDocChange│
//!                             │  d/<id>  │ │ i/<n>/  │ │ (Topic)   │
//!                             └────┬─────┘ └────┬────┘ └─────┬─────┘
//!                                  └────────────┼────────────┘
//!                                               ▼
//!                                  ┌────────────────────────┐
//!                                  │ Transaction (Mem/Rocks)│
//!                                  └────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`kv`] — transaction trait, substrates, key codec, counter, topic
//! - [`data`] — indexes, document repository, update checkers, repos

pub mod data;
pub mod kv;

pub use data::{
    DataError, DocRepo, DocRepoConfig, IgnoreChanges, IndexSpec, OnDocChange, TopicChangeFeed,
    UpdateChecker, WritableChecker,
};
pub use kv::{
    Condition, IndexKey, KeyPart, MemStore, RocksStore, StoreConfig, StoreError, Topic,
    TopicEntry, Transaction,
};
