//! Key-prefixed views over a transaction.

use super::{cancellable, Condition, KvEntry, Result, Transaction};
use futures_util::stream::{LocalBoxStream, StreamExt};
use std::ops::Bound;
use syncdoc_core::Context;

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when no such key exists (empty prefix or all `0xFF`).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Condition matching exactly the keys that start with `prefix`.
pub fn starts_with_condition(prefix: &[u8]) -> Condition<Vec<u8>> {
    Condition {
        lower: Bound::Included(prefix.to_vec()),
        upper: prefix_end(prefix).map_or(Bound::Unbounded, Bound::Excluded),
    }
}

/// Every entry whose key starts with `prefix`, in key order.
pub fn query_starts_with<'a, T: Transaction + ?Sized>(
    txn: &'a T,
    ctx: &'a Context,
    prefix: &[u8],
) -> LocalBoxStream<'a, Result<KvEntry>> {
    txn.query(ctx, starts_with_condition(prefix))
}

pub fn with_prefix<T: Transaction + ?Sized>(txn: &T, prefix: impl AsRef<[u8]>) -> Prefixed<'_, T> {
    Prefixed {
        inner: txn,
        prefix: prefix.as_ref().to_vec(),
    }
}

/// A transaction restricted to the keys under `prefix`.
///
/// Keys passed in are relative to the prefix; keys coming out of
/// [`Transaction::query`] have the prefix stripped.
pub struct Prefixed<'a, T: ?Sized> {
    inner: &'a T,
    prefix: Vec<u8>,
}

impl<T: ?Sized> Clone for Prefixed<'_, T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner,
            prefix: self.prefix.clone(),
        }
    }
}

impl<'a, T: Transaction + ?Sized> Prefixed<'a, T> {
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Narrow the view further without nesting wrapper types.
    pub fn nested(&self, sub: impl AsRef<[u8]>) -> Prefixed<'a, T> {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(sub.as_ref());
        Prefixed {
            inner: self.inner,
            prefix,
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn inner_condition(&self, condition: Condition<Vec<u8>>) -> Condition<Vec<u8>> {
        let lower = match condition.lower {
            Bound::Included(k) => Bound::Included(self.full_key(&k)),
            Bound::Excluded(k) => Bound::Excluded(self.full_key(&k)),
            Bound::Unbounded => Bound::Included(self.prefix.clone()),
        };
        let upper = match condition.upper {
            Bound::Included(k) => Bound::Included(self.full_key(&k)),
            Bound::Excluded(k) => Bound::Excluded(self.full_key(&k)),
            Bound::Unbounded => prefix_end(&self.prefix).map_or(Bound::Unbounded, Bound::Excluded),
        };
        Condition { lower, upper }
    }
}

impl<T: Transaction + ?Sized> Transaction for Prefixed<'_, T> {
    async fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(ctx, &self.full_key(key)).await
    }

    async fn put(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.put(ctx, &self.full_key(key), value).await
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        self.inner.delete(ctx, &self.full_key(key)).await
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        condition: Condition<Vec<u8>>,
    ) -> LocalBoxStream<'a, Result<KvEntry>> {
        let strip = self.prefix.len();
        let entries = self
            .inner
            .query(ctx, self.inner_condition(condition))
            .map(move |entry| {
                entry.map(|mut e| {
                    e.key.drain(..strip);
                    e
                })
            });
        cancellable(ctx, entries)
    }
}
