//! Change notification listeners.

use super::error::Result;
use crate::kv::{Topic, Transaction};
use serde::{Deserialize, Serialize};
use syncdoc_core::{Context, CrdtDiff};
use uuid::Uuid;

/// Called once per `create`, and per `update` that changed something,
/// inside the same transaction as the write.
#[allow(async_fn_in_trait)]
pub trait OnDocChange {
    async fn on_change(&self, ctx: &Context, id: Uuid, diff: &CrdtDiff) -> Result<()>;
}

impl<F> OnDocChange for F
where
    F: Fn(Uuid, &CrdtDiff) -> Result<()>,
{
    async fn on_change(&self, ctx: &Context, id: Uuid, diff: &CrdtDiff) -> Result<()> {
        ctx.ensure_active()?;
        self(id, diff)
    }
}

/// Listener that drops every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreChanges;

impl OnDocChange for IgnoreChanges {
    async fn on_change(&self, _ctx: &Context, _id: Uuid, _diff: &CrdtDiff) -> Result<()> {
        Ok(())
    }
}

/// One entry of a change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChange {
    pub id: Uuid,
    pub diff: CrdtDiff,
}

/// Appends every change to a [`Topic`] in the same transaction, so
/// subscribers can replay changes in commit order by offset.
pub struct TopicChangeFeed<T> {
    topic: Topic<T, DocChange>,
}

impl<T: Transaction> TopicChangeFeed<T> {
    pub fn new(txn: T) -> Self {
        Self {
            topic: Topic::new(txn),
        }
    }

    pub fn topic(&self) -> &Topic<T, DocChange> {
        &self.topic
    }
}

impl<T: Transaction> OnDocChange for TopicChangeFeed<T> {
    async fn on_change(&self, ctx: &Context, id: Uuid, diff: &CrdtDiff) -> Result<()> {
        self.topic
            .push(
                ctx,
                &[DocChange {
                    id,
                    diff: diff.clone(),
                }],
            )
            .await?;
        Ok(())
    }
}
