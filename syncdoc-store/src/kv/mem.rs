//! In-memory substrate.
//!
//! Snapshot isolation with optimistic conflict detection: a transaction
//! reads from the committed state as of `begin()` overlaid with its own
//! writes, and `commit()` fails with [`StoreError::Conflict`] if any key it
//! read or wrote was committed by someone else in the meantime.
//!
//! Commit versions are only kept while a transaction that could conflict
//! with them is still open. When the oldest open transaction ends, every
//! version at or below the next oldest `begin` sequence is dropped.

use super::{cancellable, Condition, KvEntry, Result, StoreError, Transaction};
use futures_util::stream::{self, LocalBoxStream};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use syncdoc_core::Context;

type Data = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Default)]
struct MemState {
    data: Arc<Data>,
    /// Commit sequence that last touched each key.
    versions: HashMap<Vec<u8>, u64>,
    seq: u64,
    /// Open transactions by `begin` sequence.
    open: BTreeMap<u64, usize>,
}

impl MemState {
    fn release(&mut self, begin_seq: u64) {
        let oldest = self.open.keys().next().copied();
        if let Some(count) = self.open.get_mut(&begin_seq) {
            *count -= 1;
            if *count == 0 {
                self.open.remove(&begin_seq);
            }
        }
        if oldest == Some(begin_seq) && !self.open.contains_key(&begin_seq) {
            let floor = self.open.keys().next().copied().unwrap_or(self.seq);
            self.versions.retain(|_, seq| *seq > floor);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn begin(&self) -> MemTransaction {
        let mut state = self.lock();
        let begin_seq = state.seq;
        *state.open.entry(begin_seq).or_default() += 1;
        MemTransaction {
            store: self.clone(),
            snapshot: Arc::clone(&state.data),
            begin_seq,
            writes: RefCell::default(),
            reads: RefCell::default(),
        }
    }

    /// Number of committed keys.
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pending writes: `None` marks a delete.
type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct MemTransaction {
    store: MemStore,
    snapshot: Arc<Data>,
    begin_seq: u64,
    writes: RefCell<WriteSet>,
    reads: RefCell<HashSet<Vec<u8>>>,
}

impl MemTransaction {
    pub fn commit(self) -> Result<()> {
        let writes = self.writes.take();
        let reads = self.reads.take();
        let mut state = self.store.lock();

        let touched = reads.iter().chain(writes.keys());
        for key in touched {
            if state.versions.get(key).is_some_and(|v| *v > self.begin_seq) {
                return Err(StoreError::Conflict(format!(
                    "key {} changed since transaction start",
                    String::from_utf8_lossy(key)
                )));
            }
        }

        if writes.is_empty() {
            return Ok(());
        }

        state.seq += 1;
        let seq = state.seq;
        let data = Arc::make_mut(&mut state.data);
        let mut touched = Vec::with_capacity(writes.len());
        for (key, value) in writes {
            match value {
                Some(v) => {
                    data.insert(key.clone(), v);
                }
                None => {
                    data.remove(&key);
                }
            }
            touched.push(key);
        }
        for key in touched {
            state.versions.insert(key, seq);
        }
        Ok(())
    }

    /// Discard all pending writes.
    pub fn rollback(self) {}

    /// First visible entry inside `condition`, merging snapshot and writes.
    fn next_visible(&self, condition: &Condition<Vec<u8>>) -> Option<KvEntry> {
        let mut lower = condition.lower.clone();
        loop {
            let range = Condition {
                lower: lower.clone(),
                upper: condition.upper.clone(),
            };
            if range.is_empty_range() {
                return None;
            }
            let bounds = (range.lower.as_ref(), range.upper.as_ref());

            let committed = self
                .snapshot
                .range::<Vec<u8>, _>(bounds)
                .next()
                .map(|(k, v)| (k.clone(), Some(v.clone())));
            let pending = self
                .writes
                .borrow()
                .range::<Vec<u8>, _>(bounds)
                .next()
                .map(|(k, v)| (k.clone(), v.clone()));

            let (key, value) = match (committed, pending) {
                (None, None) => return None,
                (Some(c), None) => c,
                (None, Some(p)) => p,
                (Some(c), Some(p)) => {
                    if p.0 <= c.0 {
                        p
                    } else {
                        c
                    }
                }
            };

            match value {
                Some(value) => return Some(KvEntry { key, value }),
                None => lower = Bound::Excluded(key),
            }
        }
    }
}

impl Drop for MemTransaction {
    fn drop(&mut self) {
        self.store.lock().release(self.begin_seq);
    }
}

impl Transaction for MemTransaction {
    async fn get(&self, ctx: &Context, key: &[u8]) -> Result<Option<Vec<u8>>> {
        ctx.ensure_active()?;
        self.reads.borrow_mut().insert(key.to_vec());
        if let Some(pending) = self.writes.borrow().get(key) {
            return Ok(pending.clone());
        }
        Ok(self.snapshot.get(key).cloned())
    }

    async fn put(&self, ctx: &Context, key: &[u8], value: &[u8]) -> Result<()> {
        ctx.ensure_active()?;
        self.writes
            .borrow_mut()
            .insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, ctx: &Context, key: &[u8]) -> Result<()> {
        ctx.ensure_active()?;
        self.writes.borrow_mut().insert(key.to_vec(), None);
        Ok(())
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        condition: Condition<Vec<u8>>,
    ) -> LocalBoxStream<'a, Result<KvEntry>> {
        let entries = stream::unfold(Some(condition), move |state| async move {
            let condition = state?;
            let entry = self.next_visible(&condition)?;
            let next = Condition {
                lower: Bound::Excluded(entry.key.clone()),
                upper: condition.upper,
            };
            Some((Ok(entry), Some(next)))
        });
        cancellable(ctx, entries)
    }
}
