//! Boards: the repository most of the domain hangs off.
//!
//! ```text
//!  d/...        DocRepo<Board>  (index `slug`, unique, only boards with a slug)
//!  c/t/<id>/v   per-board counter
//! ```

use crate::data::change::OnDocChange;
use crate::data::doc_repo::{DocRepo, DocRepoConfig};
use crate::data::error::DataError;
use crate::data::index::IndexSpec;
use crate::data::update_checker::WritableChecker;
use crate::index_key;
use crate::kv::{with_prefix, Counter, Dict, Prefixed, StoreError, Transaction};
use serde::{Deserialize, Serialize};
use syncdoc_core::{Context, CrdtDiff, Document, Timestamp};
use uuid::Uuid;

pub const SLUG_INDEX: &str = "slug";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub name: String,
    pub owner_id: Uuid,
    pub deleted: bool,
}

impl Board {
    pub fn new(name: impl Into<String>, owner_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Timestamp::ZERO,
            updated_at: Timestamp::ZERO,
            slug: None,
            name: name.into(),
            owner_id,
            deleted: false,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

impl Document for Board {
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

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board with slug {0} already exists")]
    SlugTaken(String),
    #[error(transparent)]
    Data(#[from] DataError),
}

impl From<StoreError> for BoardError {
    fn from(e: StoreError) -> Self {
        BoardError::Data(e.into())
    }
}

pub type Result<T, E = BoardError> = std::result::Result<T, E>;

fn validate(board: &Board) -> Result<(), String> {
    if board.name.trim().is_empty() {
        return Err("name must not be empty".into());
    }
    if board.slug.as_deref().is_some_and(str::is_empty) {
        return Err("slug must not be empty".into());
    }
    Ok(())
}

/// Config shared by every `BoardRepo`.
pub fn board_config() -> std::result::Result<DocRepoConfig<Board>, DataError> {
    DocRepoConfig::new()
        .index(
            SLUG_INDEX,
            IndexSpec::new(|b: &Board| index_key![b.slug.clone()])
                .unique()
                .include(|b: &Board| b.slug.is_some()),
        )
        .map(|config| config.schema(validate))
}

/// Fields a replica may change through [`BoardRepo::apply`].
pub fn board_writable() -> WritableChecker {
    WritableChecker::new([("name", true), ("ownerId", true), ("deleted", true)])
}

fn map_slug_error(err: DataError, slug: Option<String>) -> BoardError {
    match err {
        DataError::UniqueViolation { index } if index == SLUG_INDEX => {
            BoardError::SlugTaken(slug.unwrap_or_default())
        }
        other => BoardError::Data(other),
    }
}

pub struct BoardRepo<'a, T: ?Sized, L> {
    docs: DocRepo<'a, T, Board, L>,
    counters: Prefixed<'a, T>,
    writable: WritableChecker,
}

impl<'a, T: Transaction + ?Sized, L: OnDocChange> BoardRepo<'a, T, L> {
    pub fn new(txn: &'a T, config: &'a DocRepoConfig<Board>, on_change: L) -> Self {
        Self {
            docs: DocRepo::with_prefix(txn, "d/", config, on_change),
            counters: with_prefix(txn, "c/"),
            writable: board_writable(),
        }
    }

    /// The underlying document repository.
    pub fn docs(&self) -> &DocRepo<'a, T, Board, L> {
        &self.docs
    }

    pub async fn get_by_id(&self, ctx: &Context, id: Uuid) -> Result<Option<Board>> {
        Ok(self.docs.get_by_id(ctx, id).await?)
    }

    pub async fn get_by_slug(&self, ctx: &Context, slug: &str) -> Result<Option<Board>> {
        Ok(self.docs.get_unique(ctx, SLUG_INDEX, index_key![slug]).await?)
    }

    pub async fn check_slug_available(&self, ctx: &Context, slug: &str) -> Result<bool> {
        Ok(self.get_by_slug(ctx, slug).await?.is_none())
    }

    pub async fn create(&self, ctx: &Context, board: Board) -> Result<Board> {
        let slug = board.slug.clone();
        self.docs
            .create(ctx, board)
            .await
            .map_err(|e| map_slug_error(e, slug))
    }

    pub async fn update<F>(&self, ctx: &Context, id: Uuid, recipe: F) -> Result<Board>
    where
        F: FnOnce(&mut Board),
    {
        let mut slug = None;
        let result = self
            .docs
            .update(ctx, id, |board| {
                recipe(board);
                slug = board.slug.clone();
            })
            .await;
        result.map_err(|e| map_slug_error(e, slug))
    }

    /// Merge a replica's diff; only `name`, `ownerId` and `deleted` may change.
    pub async fn apply(&self, ctx: &Context, id: Uuid, diff: &CrdtDiff) -> Result<Board> {
        Ok(self.docs.apply(ctx, id, diff, Some(&self.writable)).await?)
    }

    /// Bump the board's counter and return the new value.
    pub async fn increment_board_counter(&self, ctx: &Context, board_id: Uuid) -> Result<u64> {
        let counters = Dict::new(&self.counters, |view| Counter::new(view, 0));
        let counter = counters.get(&board_id.to_string())?;
        Ok(counter.increment(ctx, 1).await?)
    }
}
