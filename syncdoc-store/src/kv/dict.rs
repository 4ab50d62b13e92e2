//! Named sub-namespaces.
//!
//! `Dict::get("x")` hands the factory a view rooted at `t/x/`, so any
//! structure (a counter, a topic, a repository) can be instantiated once
//! per name without the instances seeing each other's keys.

use super::prefixed::{with_prefix, Prefixed};
use super::{Result, StoreError, Transaction};

const ITEM_PREFIX: &str = "t/";

pub struct Dict<'a, T: ?Sized, F> {
    txn: &'a T,
    factory: F,
}

impl<'a, T: Transaction + ?Sized, F> Dict<'a, T, F> {
    pub fn new<R>(txn: &'a T, factory: F) -> Self
    where
        F: Fn(Prefixed<'a, T>) -> R,
    {
        Self { txn, factory }
    }

    /// Instance for `name`. Names must not contain `/`.
    pub fn get<R>(&self, name: &str) -> Result<R>
    where
        F: Fn(Prefixed<'a, T>) -> R,
    {
        if name.contains('/') {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok((self.factory)(with_prefix(
            self.txn,
            format!("{ITEM_PREFIX}{name}/"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{Counter, MemStore};
    use syncdoc_core::Context;

    #[tokio::test]
    async fn test_dict_items_are_isolated() {
        let store = MemStore::new();
        let txn = store.begin();
        let ctx = Context::background();
        let counters = Dict::new(&txn, |view| Counter::new(view, 0));

        counters.get("a").unwrap().increment(&ctx, 2).await.unwrap();
        counters.get("b").unwrap().increment(&ctx, 7).await.unwrap();

        assert_eq!(counters.get("a").unwrap().get(&ctx).await.unwrap(), 2);
        assert_eq!(counters.get("b").unwrap().get(&ctx).await.unwrap(), 7);
        assert_eq!(txn.get(&ctx, b"t/a/v").await.unwrap(), Some(2u64.to_be_bytes().to_vec()));
    }

    #[test]
    fn test_dict_rejects_slash() {
        let store = MemStore::new();
        let txn = store.begin();
        let counters = Dict::new(&txn, |view| Counter::new(view, 0));
        assert!(matches!(
            counters.get("a/b"),
            Err(StoreError::InvalidName(name)) if name == "a/b"
        ));
    }
}
