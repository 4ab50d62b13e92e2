//! Ordered key-value substrate.
//!
//! Everything above this module talks to storage through the
//! [`Transaction`] trait: point reads and writes plus ordered range scans
//! over raw byte keys. Two substrates implement it:
//!
//! - [`MemStore`] — in-memory, snapshot isolated, optimistic commit
//! - [`RocksStore`] — RocksDB `OptimisticTransactionDB`
//!
//! Higher-level structures carve the keyspace into regions with
//! [`Prefixed`] views:
//!
//! ```text
//!  <root>/d/<uuid>               primary documents
//!  <root>/i/<index>/<key>        index entries
//!  <topic>/i/v                   topic offset counter
//!  <topic>/l/<u64 be>            topic log
//! ```

pub mod counter;
pub mod dict;
pub mod key_codec;
pub mod mem;
pub mod prefixed;
pub mod rocks;
pub mod topic;

pub use counter::Counter;
pub use dict::Dict;
pub use key_codec::{compare_key, compare_part, IndexKey, KeyCodecError, KeyPart};
pub use mem::{MemStore, MemTransaction};
pub use prefixed::{prefix_end, query_starts_with, with_prefix, Prefixed};
pub use rocks::{RocksStore, RocksTransaction, StoreConfig};
pub use topic::{Topic, TopicEntry};

use futures_util::stream::{self, LocalBoxStream, Stream, StreamExt};
use std::ops::Bound;
use syncdoc_core::{Cancelled, Context};

/// Storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    /// Another transaction committed a conflicting write first.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("invalid name {0:?}: names must not contain '/'")]
    InvalidName(String),
    #[error(transparent)]
    KeyCodec(#[from] KeyCodecError),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Range condition: a lower and an upper bound, either may be open.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition<K> {
    pub lower: Bound<K>,
    pub upper: Bound<K>,
}

impl<K> Condition<K> {
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn gt(key: K) -> Self {
        Self {
            lower: Bound::Excluded(key),
            upper: Bound::Unbounded,
        }
    }

    pub fn gte(key: K) -> Self {
        Self {
            lower: Bound::Included(key),
            upper: Bound::Unbounded,
        }
    }

    pub fn lt(key: K) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Excluded(key),
        }
    }

    pub fn lte(key: K) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Included(key),
        }
    }

    /// Add an exclusive upper bound.
    pub fn and_lt(mut self, key: K) -> Self {
        self.upper = Bound::Excluded(key);
        self
    }

    /// Add an inclusive upper bound.
    pub fn and_lte(mut self, key: K) -> Self {
        self.upper = Bound::Included(key);
        self
    }

    pub fn map<U>(self, mut f: impl FnMut(K) -> U) -> Condition<U> {
        Condition {
            lower: map_bound(self.lower, &mut f),
            upper: map_bound(self.upper, &mut f),
        }
    }
}

fn map_bound<K, U>(bound: Bound<K>, f: &mut impl FnMut(K) -> U) -> Bound<U> {
    match bound {
        Bound::Included(k) => Bound::Included(f(k)),
        Bound::Excluded(k) => Bound::Excluded(f(k)),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl Condition<Vec<u8>> {
    pub fn is_before_lower(&self, key: &[u8]) -> bool {
        match &self.lower {
            Bound::Included(lo) => key < lo.as_slice(),
            Bound::Excluded(lo) => key <= lo.as_slice(),
            Bound::Unbounded => false,
        }
    }

    pub fn is_past_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Included(hi) => key > hi.as_slice(),
            Bound::Excluded(hi) => key >= hi.as_slice(),
            Bound::Unbounded => false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        !self.is_before_lower(key) && !self.is_past_upper(key)
    }

    /// True when no key can satisfy both bounds.
    pub fn is_empty_range(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(lo), Bound::Included(hi)) => lo > hi,
            (Bound::Included(lo), Bound::Excluded(hi))
            | (Bound::Excluded(lo), Bound::Included(hi))
            | (Bound::Excluded(lo), Bound::Excluded(hi)) => lo >= hi,
            _ => false,
        }
    }
}

/// Transactional view over an ordered byte keyspace.
///
/// All methods take `&self`; implementations use interior mutability so
/// that independent writes of one logical operation can be issued
/// concurrently and joined. A transaction is still a single linear unit
/// of work: it must not be shared by independently committing callers.
#[allow(async_fn_in_trait)]
pub trait Transaction {
    async fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>>;

    async fn put(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()>;

    async fn delete(&self, ctx: &Context, key: &[u8]) -> Result<()>;

    /// Entries inside `condition`, ascending by unsigned byte order.
    ///
    /// The stream is lazy: the underlying scan advances only as the
    /// consumer pulls, and dropping the stream stops it.
    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        condition: Condition<Vec<u8>>,
    ) -> LocalBoxStream<'a, Result<KvEntry>>;
}

impl<T: Transaction + ?Sized> Transaction for &T {
    async fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        (**self).get(ctx, key).await
    }

    async fn put(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        (**self).put(ctx, key, value).await
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        (**self).delete(ctx, key).await
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        condition: Condition<Vec<u8>>,
    ) -> LocalBoxStream<'a, Result<KvEntry>> {
        (**self).query(ctx, condition)
    }
}

/// Stop `inner` as soon as `ctx` is cancelled.
///
/// The cancellation is reported once as an error item, then the stream
/// ends and `inner` is dropped.
pub fn cancellable<'a, S, T, E>(ctx: &'a Context, inner: S) -> LocalBoxStream<'a, Result<T, E>>
where
    S: Stream<Item = Result<T, E>> + 'a,
    E: From<Cancelled> + 'a,
    T: 'a,
{
    stream::unfold(Some(Box::pin(inner)), move |state| async move {
        let mut inner = state?;
        if let Err(cancelled) = ctx.ensure_active() {
            return Some((Err(E::from(cancelled)), None));
        }
        let item = inner.next().await?;
        Some((item, Some(inner)))
    })
    .boxed_local()
}
