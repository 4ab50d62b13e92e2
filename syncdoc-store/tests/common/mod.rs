#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;
use syncdoc_core::{CrdtDiff, Document, ManualClock, Timestamp};
use syncdoc_store::data::DataError;
use syncdoc_store::{index_key, DocRepoConfig, IndexSpec};
use uuid::Uuid;

// ─── Test document ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: Uuid,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub name: String,
    pub age: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub team: String,
}

impl Person {
    pub fn new(name: &str, age: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Timestamp::ZERO,
            updated_at: Timestamp::ZERO,
            name: name.to_string(),
            age,
            email: None,
            team: "core".to_string(),
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn in_team(mut self, team: &str) -> Self {
        self.team = team.to_string();
        self
    }
}

impl Document for Person {
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

// ─── Config ──────────────────────────────────────────────────────────────────

pub const BY_AGE: &str = "age";
pub const BY_EMAIL: &str = "email";
pub const BY_TEAM_AGE: &str = "team_age";
pub const BY_NAME: &str = "name";

pub fn person_config(clock: Arc<ManualClock>) -> DocRepoConfig<Person> {
    DocRepoConfig::new()
        .index(BY_AGE, IndexSpec::new(|p: &Person| index_key![p.age]))
        .and_then(|c| {
            c.index(
                BY_EMAIL,
                IndexSpec::new(|p: &Person| index_key![p.email.clone()])
                    .unique()
                    .include(|p: &Person| p.email.is_some()),
            )
        })
        .and_then(|c| {
            c.index(
                BY_TEAM_AGE,
                IndexSpec::new(|p: &Person| index_key![p.team.clone(), p.age]),
            )
        })
        .and_then(|c| c.index(BY_NAME, IndexSpec::new(|p: &Person| index_key![p.name.clone()])))
        .map(|c| {
            c.clock(clock).schema(|p: &Person| {
                if p.name.is_empty() {
                    Err("name is required".to_string())
                } else {
                    Ok(())
                }
            })
        })
        .unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp(1_000)))
}

// ─── Change recorder ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Recorder {
    pub changes: RefCell<Vec<(Uuid, CrdtDiff)>>,
}

impl Recorder {
    pub fn listener(&self) -> impl Fn(Uuid, &CrdtDiff) -> Result<(), DataError> + '_ {
        move |id, diff| {
            self.changes.borrow_mut().push((id, diff.clone()));
            Ok(())
        }
    }

    pub fn count(&self) -> usize {
        self.changes.borrow().len()
    }
}
