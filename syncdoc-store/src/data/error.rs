use crate::kv::{KeyCodecError, StoreError};
use syncdoc_core::{Cancelled, CrdtError};
use uuid::Uuid;

/// Failures of the document layer.
///
/// Every variant aborts the surrounding operation; none are retried here.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("doc not found: {0}")]
    NotFound(Uuid),
    #[error("doc {0} already exists")]
    AlreadyExists(Uuid),
    #[error("unique index constraint violation: {index}")]
    UniqueViolation { index: String },
    #[error("index {index} contains multiple docs for the key: {key}")]
    Multiplicity { index: String, key: String },
    #[error("doc failed schema validation: {0}")]
    SchemaInvalid(String),
    #[error("unauthorized write: {}", .0.join("; "))]
    UnauthorizedWrite(Vec<String>),
    #[error("invalid index sync: {0}")]
    InvalidSync(&'static str),
    #[error("invalid diff: diff changes id of {expected} to {actual}")]
    IdMismatch { expected: Uuid, actual: Uuid },
    #[error("index not found: {0}")]
    IndexNotFound(String),
    #[error("index name cannot contain /: {0}")]
    InvalidIndexName(String),
    #[error("index key has {len} parts, at most {max} allowed")]
    KeyTooLong { len: usize, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crdt(#[from] CrdtError),
    #[error(transparent)]
    KeyCodec(#[from] KeyCodecError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type Result<T, E = DataError> = std::result::Result<T, E>;
