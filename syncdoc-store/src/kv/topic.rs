//! Append-only offset log.
//!
//! ```text
//!  i/v            counter: next free offset (u64 BE)
//!  l/<u64 BE>     bincode(entry)
//! ```
//!
//! `push` reserves a contiguous block of offsets with a single counter
//! increment, so items from one call are never interleaved with another
//! pusher's items. Big-endian offsets make key order equal offset order,
//! which lets `list` be a bounded range scan.

use super::{Condition, Counter, Result, StoreError, Transaction};
use super::prefixed::with_prefix;
use futures_util::future::try_join_all;
use futures_util::stream::{LocalBoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::ops::Range;
use syncdoc_core::Context;

const COUNTER_PREFIX: &[u8] = b"i/";
const LOG_PREFIX: &[u8] = b"l/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry<V> {
    pub offset: u64,
    pub data: V,
}

pub struct Topic<T, V> {
    txn: T,
    _marker: PhantomData<fn() -> V>,
}

impl<T, V> Topic<T, V>
where
    T: Transaction,
    V: Serialize + DeserializeOwned,
{
    pub fn new(txn: T) -> Self {
        Self {
            txn,
            _marker: PhantomData,
        }
    }

    fn counter(&self) -> Counter<super::Prefixed<'_, T>> {
        Counter::new(with_prefix(&self.txn, COUNTER_PREFIX), 0)
    }

    /// Offset the next pushed item will get.
    pub async fn next_offset(&self, ctx: &Context) -> Result<u64> {
        self.counter().get(ctx).await
    }

    /// Append `items` and return the offsets they were written at.
    pub async fn push(&self, ctx: &Context, items: &[V]) -> Result<Range<u64>> {
        let counter = self.counter();
        if items.is_empty() {
            let next = counter.get(ctx).await?;
            return Ok(next..next);
        }

        let count = items.len() as u64;
        let end = counter.increment(ctx, count).await?;
        let start = end - count;

        let writes = items.iter().enumerate().map(|(i, item)| async move {
            let bytes = encode(item)?;
            self.txn.put(ctx, &log_key(start + i as u64), &bytes).await
        });
        try_join_all(writes).await?;

        log::trace!("topic append offsets {start}..{end}");
        Ok(start..end)
    }

    /// Entries with `start <= offset < end`, in offset order.
    pub fn list<'a>(
        &'a self,
        ctx: &'a Context,
        start: u64,
        end: u64,
    ) -> LocalBoxStream<'a, Result<TopicEntry<V>>>
    where
        V: 'a,
    {
        let condition = Condition::gte(log_key(start)).and_lt(log_key(end));
        self.txn
            .query(ctx, condition)
            .map(|entry| -> Result<TopicEntry<V>> {
                let entry = entry?;
                Ok(TopicEntry {
                    offset: offset_of(&entry.key)?,
                    data: decode(&entry.value)?,
                })
            })
            .boxed_local()
    }
}

fn log_key(offset: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(LOG_PREFIX.len() + 8);
    key.extend_from_slice(LOG_PREFIX);
    key.extend_from_slice(&offset.to_be_bytes());
    key
}

fn offset_of(key: &[u8]) -> Result<u64> {
    key.strip_prefix(LOG_PREFIX)
        .and_then(|raw| <[u8; 8]>::try_from(raw).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StoreError::Deserialization("malformed topic key".into()))
}

fn encode<V: Serialize>(value: &V) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<V: DeserializeOwned>(bytes: &[u8]) -> Result<V> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}
