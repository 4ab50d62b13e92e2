//! Transactional u64 counter.
//!
//! Stored as a big-endian u64 under key `v`. Increments are read-modify-write
//! inside the caller's transaction, so concurrent increments from separate
//! transactions conflict at commit rather than losing updates.

use super::{Result, StoreError, Transaction};
use syncdoc_core::Context;

const VALUE_KEY: &[u8] = b"v";

pub struct Counter<T> {
    txn: T,
    initial: u64,
}

impl<T: Transaction> Counter<T> {
    /// `initial` is reported until the first increment.
    pub fn new(txn: T, initial: u64) -> Self {
        Self { txn, initial }
    }

    pub async fn get(&self, ctx: &Context) -> Result<u64> {
        match self.txn.get(ctx, VALUE_KEY).await? {
            Some(bytes) => decode(&bytes),
            None => Ok(self.initial),
        }
    }

    /// Add `delta` and return the new value.
    pub async fn increment(&self, ctx: &Context, delta: u64) -> Result<u64> {
        let current = self.get(ctx).await?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| StoreError::Serialization("counter overflow".into()))?;
        self.txn.put(ctx, VALUE_KEY, &next.to_be_bytes()).await?;
        Ok(next)
    }
}

fn decode(bytes: &[u8]) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Deserialization(format!("counter value has {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}
