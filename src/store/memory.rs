//! In-process store for tests and single-process runs.

use super::{InsertOutcome, ResultStore};
use crate::error::{Error, Result};
use crate::model::ResultEvent;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<String, ResultEvent>>,
    failures: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` inserts fail as if the database were unreachable.
    pub fn fail_next_inserts(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows().is_empty()
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<String, ResultEvent>> {
        self.rows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ResultStore for InMemoryStore {
    async fn insert_if_absent(&self, event: &ResultEvent) -> Result<InsertOutcome> {
        if self.take_failure() {
            return Err(Error::Other("store unavailable".to_string()));
        }
        match self.rows().entry(event.submission_id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, submission_id: &str) -> Result<Option<ResultEvent>> {
        Ok(self.rows().get(submission_id).cloned())
    }
}
