//! Document layer: secondary indexes, the document repository, write
//! authorization for replicated diffs and change feeds.

pub mod change;
mod codec;
pub mod doc_repo;
pub mod error;
pub mod index;
pub mod repos;
pub mod update_checker;

pub use change::{DocChange, IgnoreChanges, OnDocChange, TopicChangeFeed};
pub use doc_repo::{AcceptAll, DocRepo, DocRepoConfig, Schema, DEFAULT_LOOKAHEAD};
pub use error::DataError;
pub use index::{Index, IndexSpec, MAX_KEY_PARTS};
pub use update_checker::{combine_checkers, AllOf, UpdateChecker, WritableChecker};
