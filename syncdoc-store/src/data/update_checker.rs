//! Field-level write authorization for the replication path.
//!
//! A checker compares the document before and after a remote diff and
//! returns one message per field the diff was not allowed to touch.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use syncdoc_core::UPDATED_AT_FIELD;

pub trait UpdateChecker<D>: Send + Sync {
    fn check(&self, prev: &D, next: &D) -> Result<(), Vec<String>>;
}

impl<D, F> UpdateChecker<D> for F
where
    F: Fn(&D, &D) -> Result<(), Vec<String>> + Send + Sync,
{
    fn check(&self, prev: &D, next: &D) -> Result<(), Vec<String>> {
        self(prev, next)
    }
}

/// Rejects changes to every field not marked writable.
///
/// Fields missing from the map count as not writable. `updatedAt` is
/// always writable since every accepted change moves it.
#[derive(Debug, Clone, Default)]
pub struct WritableChecker {
    writable: HashMap<String, bool>,
}

impl WritableChecker {
    pub fn new<K: Into<String>>(fields: impl IntoIterator<Item = (K, bool)>) -> Self {
        Self {
            writable: fields.into_iter().map(|(k, w)| (k.into(), w)).collect(),
        }
    }

    fn is_writable(&self, field: &str) -> bool {
        field == UPDATED_AT_FIELD || self.writable.get(field).copied().unwrap_or(false)
    }
}

fn fields_of<D: Serialize>(doc: &D) -> Result<Map<String, Value>, String> {
    match serde_json::to_value(doc) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err("document must serialize to an object".to_string()),
        Err(e) => Err(format!("document is not serializable: {e}")),
    }
}

impl<D: Serialize> UpdateChecker<D> for WritableChecker {
    fn check(&self, prev: &D, next: &D) -> Result<(), Vec<String>> {
        let prev = fields_of(prev).map_err(|e| vec![e])?;
        let next = fields_of(next).map_err(|e| vec![e])?;

        let keys: BTreeSet<&String> = prev.keys().chain(next.keys()).collect();
        let errors: Vec<String> = keys
            .into_iter()
            .filter(|key| prev.get(*key) != next.get(*key))
            .filter(|key| !self.is_writable(key))
            .map(|key| format!("property {key} is not writable"))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Logical AND of several checkers; errors are concatenated.
pub struct AllOf<D> {
    checkers: Vec<Box<dyn UpdateChecker<D>>>,
}

impl<D> AllOf<D> {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
        }
    }

    pub fn with(mut self, checker: impl UpdateChecker<D> + 'static) -> Self {
        self.checkers.push(Box::new(checker));
        self
    }
}

impl<D> Default for AllOf<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> UpdateChecker<D> for AllOf<D> {
    fn check(&self, prev: &D, next: &D) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .checkers
            .iter()
            .filter_map(|c| c.check(prev, next).err())
            .flatten()
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub fn combine_checkers<D>(checkers: Vec<Box<dyn UpdateChecker<D>>>) -> AllOf<D> {
    AllOf { checkers }
}
