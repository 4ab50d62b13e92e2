//! Field-level CRDT wrapper around a yrs `Doc`.
//!
//! A document is stored as a single root map named `doc`; each top-level
//! serde field is one last-writer-wins register inside it.
//!
//! ```text
//!   T ──serde_json──► {field: Value} ──► MapRef "doc" { field: Any }
//!                                              │
//!                        encode_update_v1 ◄────┘  (CrdtDiff)
//! ```
//!
//! The store never merges state itself. It only sequences calls to
//! [`Crdt::from_value`], [`Crdt::load`], [`Crdt::snapshot`],
//! [`Crdt::update`] and [`Crdt::apply`].

mod convert;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, Update};

use crate::Document;
use convert::{any_to_json, json_to_any};

const ROOT_MAP: &str = "doc";

#[derive(Debug, thiserror::Error)]
pub enum CrdtError {
    #[error("failed to decode crdt update: {0}")]
    Decode(String),
    #[error("failed to apply crdt update: {0}")]
    Apply(String),
    #[error("document must serialize to an object")]
    NotAnObject,
    #[error("field {0} holds an unsupported value")]
    UnsupportedField(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = CrdtError> = std::result::Result<T, E>;

/// Encoded yrs v1 update: either a full state or an incremental change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrdtDiff(Vec<u8>);

impl CrdtDiff {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Crdt<T> {
    doc: Doc,
    root: MapRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for Crdt<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crdt")
            .field("client_id", &self.doc.client_id())
            .finish()
    }
}

impl<T: Document> Crdt<T> {
    fn empty() -> Self {
        let doc = Doc::new();
        let root = doc.get_or_insert_map(ROOT_MAP);
        Self {
            doc,
            root,
            _marker: PhantomData,
        }
    }

    /// Build a fresh replica holding `value`.
    pub fn from_value(value: &T) -> Result<Self> {
        let mut crdt = Self::empty();
        crdt.write(value)?;
        Ok(crdt)
    }

    /// Rebuild a replica from a full state (or any update sequence).
    pub fn load(state: &CrdtDiff) -> Result<Self> {
        let mut crdt = Self::empty();
        crdt.apply(state)?;
        Ok(crdt)
    }

    /// Current value of the document.
    pub fn snapshot(&self) -> Result<T> {
        let txn = self.doc.transact();
        let mut fields = serde_json::Map::new();
        for (key, out) in self.root.iter(&txn) {
            match out {
                Out::Any(any) => {
                    fields.insert(key.to_string(), any_to_json(key, &any)?);
                }
                _ => return Err(CrdtError::UnsupportedField(key.to_string())),
            }
        }
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    /// Full state, loadable with [`Crdt::load`].
    pub fn state(&self) -> CrdtDiff {
        let txn = self.doc.transact();
        CrdtDiff(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// Changes a replica at `state_vector` is missing.
    pub fn diff_since(&self, state_vector: &[u8]) -> Result<CrdtDiff> {
        let sv = StateVector::decode_v1(state_vector)
            .map_err(|e| CrdtError::Decode(e.to_string()))?;
        let txn = self.doc.transact();
        Ok(CrdtDiff(txn.encode_state_as_update_v1(&sv)))
    }

    /// Run `recipe` on a copy of the current value and record the result.
    ///
    /// Returns `None` when the recipe left every field untouched.
    pub fn update<F>(&mut self, recipe: F) -> Result<Option<CrdtDiff>>
    where
        F: FnOnce(&mut T),
    {
        let mut draft = self.snapshot()?;
        recipe(&mut draft);
        self.write(&draft)
    }

    /// Make the replica hold `next`, touching only the fields that differ.
    pub fn write(&mut self, next: &T) -> Result<Option<CrdtDiff>> {
        let fields = match serde_json::to_value(next)? {
            Value::Object(fields) => fields,
            _ => return Err(CrdtError::NotAnObject),
        };

        let mut txn = self.doc.transact_mut();
        let mut changed = false;

        for (key, value) in &fields {
            let any = json_to_any(value);
            let same = matches!(self.root.get(&txn, key), Some(Out::Any(ref current)) if *current == any);
            if !same {
                self.root.insert(&mut txn, key.as_str(), any);
                changed = true;
            }
        }

        let stale: Vec<String> = self
            .root
            .keys(&txn)
            .filter(|k| !fields.contains_key(*k))
            .map(String::from)
            .collect();
        for key in stale {
            self.root.remove(&mut txn, &key);
            changed = true;
        }

        if !changed {
            return Ok(None);
        }
        let diff = CrdtDiff(txn.encode_update_v1());
        debug!("crdt write produced a {} byte diff", diff.len());
        Ok(Some(diff))
    }

    /// Merge a remote diff into this replica.
    pub fn apply(&mut self, diff: &CrdtDiff) -> Result<()> {
        let update = Update::decode_v1(diff.as_bytes()).map_err(|e| {
            warn!("rejecting undecodable crdt diff ({} bytes): {}", diff.len(), e);
            CrdtError::Decode(e.to_string())
        })?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CrdtError::Apply(e.to_string()))?;
        debug!("applied a {} byte crdt diff", diff.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Timestamp;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Note {
        id: Uuid,
        created_at: Timestamp,
        updated_at: Timestamp,
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        likes: u32,
    }

    impl Document for Note {
        fn id(&self) -> Uuid {
            self.id
        }
        fn created_at(&self) -> Timestamp {
            self.created_at
        }
        fn updated_at(&self) -> Timestamp {
            self.updated_at
        }
        fn set_created_at(&mut self, at: Timestamp) {
            self.created_at = at;
        }
        fn set_updated_at(&mut self, at: Timestamp) {
            self.updated_at = at;
        }
    }

    fn note() -> Note {
        Note {
            id: Uuid::new_v4(),
            created_at: Timestamp(1),
            updated_at: Timestamp(1),
            title: "hello".into(),
            body: Some("world".into()),
            likes: 0,
        }
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let value = note();
        let crdt = Crdt::from_value(&value).unwrap();
        assert_eq!(crdt.snapshot().unwrap(), value);
    }

    #[test]
    fn test_load_from_state() {
        let value = note();
        let crdt = Crdt::from_value(&value).unwrap();
        let replica = Crdt::<Note>::load(&crdt.state()).unwrap();
        assert_eq!(replica.snapshot().unwrap(), value);
    }

    #[test]
    fn test_update_without_change_yields_no_diff() {
        let mut crdt = Crdt::from_value(&note()).unwrap();
        let diff = crdt.update(|n| n.title = "hello".into()).unwrap();
        assert!(diff.is_none());
    }

    #[test]
    fn test_update_removes_missing_field() {
        let mut crdt = Crdt::from_value(&note()).unwrap();
        let diff = crdt.update(|n| n.body = None).unwrap();
        assert!(diff.is_some());
        assert_eq!(crdt.snapshot().unwrap().body, None);
    }

    #[test]
    fn test_diff_converges_replicas() {
        let value = note();
        let mut a = Crdt::from_value(&value).unwrap();
        let mut b = Crdt::<Note>::load(&a.state()).unwrap();

        let diff = a.update(|n| n.likes = 3).unwrap().unwrap();
        b.apply(&diff).unwrap();

        assert_eq!(b.snapshot().unwrap().likes, 3);
        assert_eq!(a.snapshot().unwrap(), b.snapshot().unwrap());
    }

    #[test]
    fn test_concurrent_edits_to_different_fields_merge() {
        let mut a = Crdt::from_value(&note()).unwrap();
        let mut b = Crdt::<Note>::load(&a.state()).unwrap();

        let da = a.update(|n| n.title = "from a".into()).unwrap().unwrap();
        let db = b.update(|n| n.likes = 9).unwrap().unwrap();
        a.apply(&db).unwrap();
        b.apply(&da).unwrap();

        let merged = a.snapshot().unwrap();
        assert_eq!(merged.title, "from a");
        assert_eq!(merged.likes, 9);
        assert_eq!(merged, b.snapshot().unwrap());
    }

    #[test]
    fn test_diff_since_state_vector() {
        let mut a = Crdt::from_value(&note()).unwrap();
        let mut b = Crdt::<Note>::load(&a.state()).unwrap();
        a.update(|n| n.title = "later".into()).unwrap();

        let missing = a.diff_since(&b.state_vector()).unwrap();
        b.apply(&missing).unwrap();
        assert_eq!(b.snapshot().unwrap().title, "later");
    }

    #[test]
    fn test_garbage_diff_is_rejected() {
        let mut crdt = Crdt::from_value(&note()).unwrap();
        let err = crdt.apply(&CrdtDiff::from_bytes(vec![0xFF, 0xFF, 0xFF])).unwrap_err();
        assert!(matches!(err, CrdtError::Decode(_) | CrdtError::Apply(_)));
    }
}
