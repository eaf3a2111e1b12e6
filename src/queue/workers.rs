use std::collections::HashMap;

use super::types::ExampleStatus;
use crate::error::Result;
use crate::store::{Memo, Serializer, Store};

const FIRST_SEEN_AT_KEY: &str = "____first_seen_at";
const LAST_SEEN_AT_KEY: &str = "____last_seen_at";

/// Per-worker liveness record and cumulative result counters. Created on
/// first contact within a run, updated on every contact, never explicitly
/// deleted; it is garbage-collected with the run's storage scope.
pub struct WorkerStore {
    store: Store,
    first_seen_at: Option<Memo<Option<u64>>>,
    last_seen_at: Option<Memo<Option<u64>>>,
}

impl WorkerStore {
    pub fn open(uri: &str, serializer: Serializer, scope: &str) -> Result<Self> {
        Ok(Self {
            store: Store::open(uri, serializer, scope)?,
            first_seen_at: None,
            last_seen_at: None,
        })
    }

    pub fn first_seen_at(&mut self) -> Result<Option<u64>> {
        if let Some(memo) = self.first_seen_at.as_ref().filter(|m| m.fresh(&self.store)) {
            return Ok(memo.value);
        }

        let value: Option<u64> = self.store.get(FIRST_SEEN_AT_KEY)?;
        self.first_seen_at = Some(Memo::new(value, self.store.generation()));
        Ok(value)
    }

    pub fn last_seen_at(&mut self) -> Result<Option<u64>> {
        if let Some(memo) = self.last_seen_at.as_ref().filter(|m| m.fresh(&self.store)) {
            return Ok(memo.value);
        }

        let value: Option<u64> = self.store.get(LAST_SEEN_AT_KEY)?;
        self.last_seen_at = Some(Memo::new(value, self.store.generation()));
        Ok(value)
    }

    pub fn set_last_seen_at(&mut self, at: u64) -> Result<()> {
        self.store.set(LAST_SEEN_AT_KEY, &at)?;
        self.last_seen_at = Some(Memo::new(Some(at), self.store.generation()));
        Ok(())
    }

    pub fn set_first_seen_at(&mut self, at: u64) -> Result<()> {
        self.store.set(FIRST_SEEN_AT_KEY, &at)?;
        self.first_seen_at = Some(Memo::new(Some(at), self.store.generation()));
        Ok(())
    }

    /// Refresh liveness: first-seen is set once, last-seen on every call.
    /// Monotonic single-owner updates, safe without the run lock.
    pub fn record_contact(&mut self, at: u64) -> Result<()> {
        if self.first_seen_at()?.is_none() {
            self.set_first_seen_at(at)?;
        }
        self.set_last_seen_at(at)
    }

    /// Cumulative counters keyed by status name.
    pub fn status_counts(&self) -> Result<HashMap<String, u64>> {
        let keys: Vec<String> = ExampleStatus::ALL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        self.store.multi_get(&keys)
    }

    /// Add newly finalized results to the cumulative counters.
    pub fn add_status_counts(&mut self, new_counts: &HashMap<ExampleStatus, u64>) -> Result<()> {
        if new_counts.is_empty() {
            return Ok(());
        }

        let existing = self.status_counts()?;

        let mut merged: HashMap<String, u64> = HashMap::new();
        for (status, count) in new_counts {
            let key = status.as_str().to_string();
            let total = existing.get(&key).copied().unwrap_or(0) + count;
            merged.insert(key, total);
        }

        self.store.merge(&merged)
    }

    pub fn failed_count(&self) -> Result<Option<u64>> {
        self.store.get(ExampleStatus::Failed.as_str())
    }

    pub fn reload(&mut self) {
        self.first_seen_at = None;
        self.last_seen_at = None;
        self.store.reload();
    }
}
