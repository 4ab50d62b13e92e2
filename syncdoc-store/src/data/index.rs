//! Secondary indexes.
//!
//! An index maps a key derived from a document to the document id.
//!
//! ```text
//!  unique:      enc(key)          → id
//!  non-unique:  enc(key ++ [id])  → id
//! ```
//!
//! Appending the id keeps entries with the same logical key distinct and
//! orders them by id. Because `Absent` is the greatest key part, the
//! byte range `[enc(k), enc(k ++ [Absent; 16]))` covers exactly the
//! entries whose key starts with `k`.

use super::error::{DataError, Result};
use crate::kv::key_codec::{self, display_key, IndexKey, KeyPart};
use crate::kv::{Condition, Prefixed, StoreError, Transaction};
use futures_util::future;
use futures_util::stream::{LocalBoxStream, StreamExt};
use std::cmp::Ordering;
use std::ops::Bound;
use syncdoc_core::{Context, Document};
use uuid::Uuid;

/// Most parts an encoded index entry may have, including the appended id.
pub const MAX_KEY_PARTS: usize = 16;

type KeySelector<D> = dyn Fn(&D) -> IndexKey + Send + Sync;
type IncludePredicate<D> = dyn Fn(&D) -> bool + Send + Sync;

/// How an index derives its key from a document.
pub struct IndexSpec<D> {
    key: Box<KeySelector<D>>,
    unique: bool,
    include: Option<Box<IncludePredicate<D>>>,
}

impl<D> IndexSpec<D> {
    pub fn new(key: impl Fn(&D) -> IndexKey + Send + Sync + 'static) -> Self {
        Self {
            key: Box::new(key),
            unique: false,
            include: None,
        }
    }

    /// At most one document per key.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Only documents matching `predicate` are indexed.
    pub fn include(mut self, predicate: impl Fn(&D) -> bool + Send + Sync + 'static) -> Self {
        self.include = Some(Box::new(predicate));
        self
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Key of `doc`, or `None` when the document is excluded.
    pub fn key_of(&self, doc: &D) -> Option<IndexKey> {
        match &self.include {
            Some(include) if !include(doc) => None,
            _ => Some((self.key)(doc)),
        }
    }
}

impl<D> std::fmt::Debug for IndexSpec<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexSpec")
            .field("unique", &self.unique)
            .field("filtered", &self.include.is_some())
            .finish()
    }
}

fn padded(key: &[KeyPart]) -> IndexKey {
    let mut out = Vec::with_capacity(key.len() + MAX_KEY_PARTS);
    out.extend_from_slice(key);
    out.extend(std::iter::repeat(KeyPart::Absent).take(MAX_KEY_PARTS));
    out
}

fn compare_prefix(entry_key: &[KeyPart], prefix: &[KeyPart]) -> Ordering {
    let n = prefix.len().min(entry_key.len());
    key_codec::compare_key(&entry_key[..n], prefix)
}

enum Step {
    Yield(Uuid),
    Skip,
    Stop,
}

/// One index bound to a transaction.
pub struct Index<'a, T: ?Sized, D> {
    txn: Prefixed<'a, T>,
    name: &'a str,
    spec: &'a IndexSpec<D>,
}

impl<'a, T: Transaction + ?Sized, D: Document> Index<'a, T, D> {
    pub fn new(txn: Prefixed<'a, T>, name: &'a str, spec: &'a IndexSpec<D>) -> Self {
        Self { txn, name, spec }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    fn entry_key(&self, key: &[KeyPart], id: Uuid) -> Result<Vec<u8>> {
        let len = key.len() + usize::from(!self.spec.unique);
        if len > MAX_KEY_PARTS {
            return Err(DataError::KeyTooLong {
                len,
                max: MAX_KEY_PARTS,
            });
        }
        if self.spec.unique {
            Ok(key_codec::encode(key))
        } else {
            let mut full = key.to_vec();
            full.push(KeyPart::Id(id));
            Ok(key_codec::encode(&full))
        }
    }

    /// Move the entry for one document from its `prev` key to its `next`
    /// key. Either side may be `None` (created, or excluded), never both.
    pub async fn sync(&self, ctx: &Context, prev: Option<&D>, next: Option<&D>) -> Result<()> {
        let id = match (prev, next) {
            (None, None) => {
                return Err(DataError::InvalidSync(
                    "at least prev or next must be present",
                ))
            }
            (Some(p), Some(n)) if p.id() != n.id() => {
                return Err(DataError::InvalidSync("changing id is not allowed"))
            }
            (Some(doc), _) | (None, Some(doc)) => doc.id(),
        };

        let prev_key = prev.and_then(|d| self.spec.key_of(d));
        let next_key = next.and_then(|d| self.spec.key_of(d));
        if prev_key == next_key {
            return Ok(());
        }

        if let Some(key) = &prev_key {
            log::trace!("index {}: remove {} for {id}", self.name, display_key(key));
            self.txn.delete(ctx, &self.entry_key(key, id)?).await?;
        }

        if let Some(key) = &next_key {
            let entry = self.entry_key(key, id)?;
            if self.spec.unique {
                if let Some(existing) = self.txn.get(ctx, &entry).await? {
                    if existing.as_slice() != id.as_bytes() {
                        return Err(DataError::UniqueViolation {
                            index: self.name.to_string(),
                        });
                    }
                }
            }
            log::trace!("index {}: add {} for {id}", self.name, display_key(key));
            self.txn.put(ctx, &entry, id.as_bytes()).await?;
        }
        Ok(())
    }

    /// Ids whose key equals `key` exactly, ascending.
    pub fn get<'s>(&'s self, ctx: &'s Context, key: IndexKey) -> LocalBoxStream<'s, Result<Uuid>> {
        let condition = Condition {
            lower: Bound::Included(key_codec::encode(&key)),
            upper: Bound::Excluded(key_codec::encode(&padded(&key))),
        };
        self.scan(ctx, condition, move |entry_key| {
            let matches = entry_key.len() >= key.len()
                && key_codec::compare_key(&entry_key[..key.len()], &key) == Ordering::Equal;
            if matches {
                Ordering::Equal
            } else {
                Ordering::Less
            }
        })
    }

    /// Ids whose key satisfies `condition`, ascending by key.
    ///
    /// Upper bounds cover whole key groups: `lt [x]` and `lte [x]` both
    /// include every entry whose key starts with `x`. `gt [x]` skips all
    /// of them, `gte [x]` starts at the first.
    ///
    /// For a bound of more than one part the leading parts act as a
    /// prefix. A lower prefix skips entries before it. An upper prefix
    /// ends the scan once an entry is past it. A one-sided condition fixes
    /// its prefix on both sides, so `gte ["b", 2]` stops at the first
    /// entry outside `"b"` and `lt ["b", 2]` skips entries before `"b"`.
    pub fn query<'s>(
        &'s self,
        ctx: &'s Context,
        condition: Condition<IndexKey>,
    ) -> LocalBoxStream<'s, Result<Uuid>> {
        let prefix_of = |bound: &Bound<IndexKey>| match bound {
            Bound::Included(k) | Bound::Excluded(k) if k.len() >= 2 => {
                Some(k[..k.len() - 1].to_vec())
            }
            _ => None,
        };
        let lower_prefix = prefix_of(&condition.lower);
        let upper_prefix = prefix_of(&condition.upper);
        let lower_bounded = !matches!(condition.lower, Bound::Unbounded);
        let upper_bounded = !matches!(condition.upper, Bound::Unbounded);

        let condition = Condition {
            lower: match condition.lower {
                Bound::Included(k) => Bound::Included(key_codec::encode(&k)),
                Bound::Excluded(k) => Bound::Excluded(key_codec::encode(&padded(&k))),
                Bound::Unbounded => Bound::Unbounded,
            },
            upper: match condition.upper {
                Bound::Included(k) => Bound::Included(key_codec::encode(&padded(&k))),
                Bound::Excluded(k) => Bound::Excluded(key_codec::encode(&padded(&k))),
                Bound::Unbounded => Bound::Unbounded,
            },
        };

        self.scan(ctx, condition, move |entry_key| {
            if let Some(prefix) = &lower_prefix {
                match compare_prefix(entry_key, prefix) {
                    Ordering::Less => return Ordering::Less,
                    Ordering::Greater if !upper_bounded => return Ordering::Greater,
                    _ => {}
                }
            }
            if let Some(prefix) = &upper_prefix {
                match compare_prefix(entry_key, prefix) {
                    Ordering::Greater => return Ordering::Greater,
                    Ordering::Less if !lower_bounded => return Ordering::Less,
                    _ => {}
                }
            }
            Ordering::Equal
        })
    }

    /// Range scan with a per-entry check on the decoded key: `Equal`
    /// yields, `Less` skips, `Greater` ends the scan.
    fn scan<'s, F>(
        &'s self,
        ctx: &'s Context,
        condition: Condition<Vec<u8>>,
        check: F,
    ) -> LocalBoxStream<'s, Result<Uuid>>
    where
        F: Fn(&[KeyPart]) -> Ordering + 's,
    {
        self.txn
            .query(ctx, condition)
            .map(move |entry| -> Result<Step> {
                let entry = entry?;
                let entry_key = key_codec::decode(&entry.key)?;
                match check(&entry_key) {
                    Ordering::Equal => {
                        let id = Uuid::from_slice(&entry.value).map_err(|e| {
                            StoreError::Deserialization(format!("index value: {e}"))
                        })?;
                        Ok(Step::Yield(id))
                    }
                    Ordering::Less => Ok(Step::Skip),
                    Ordering::Greater => Ok(Step::Stop),
                }
            })
            .take_while(|step| future::ready(!matches!(step, Ok(Step::Stop))))
            .filter_map(|step| {
                future::ready(match step {
                    Ok(Step::Yield(id)) => Some(Ok(id)),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                })
            })
            .boxed_local()
    }
}
