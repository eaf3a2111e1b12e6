use std::collections::HashMap;

use super::types::Example;
use crate::error::Result;
use crate::store::{Serializer, Store};

/// Examples currently leased to a worker, keyed by example id. Each entry
/// carries the owning `worker_id` and the lease start time; every id here is
/// absent from pending and completed.
pub struct ProcessingStore {
    store: Store,
}

impl ProcessingStore {
    pub fn open(uri: &str, serializer: Serializer, scope: &str) -> Result<Self> {
        Ok(Self {
            store: Store::open(uri, serializer, scope)?,
        })
    }

    pub fn multi_get(&self, ids: &[String]) -> Result<HashMap<String, Example>> {
        self.store.multi_get(ids)
    }

    pub fn merge(&self, entries: &HashMap<String, Example>) -> Result<()> {
        self.store.merge(entries)
    }

    pub fn delete(&self, ids: &[String]) -> Result<()> {
        self.store.delete(ids)
    }

    pub fn to_map(&self) -> Result<HashMap<String, Example>> {
        self.store.to_map()
    }

    pub fn len(&self) -> Result<usize> {
        self.store.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.store.is_empty()
    }

    pub fn any(&self) -> Result<bool> {
        self.store.any()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    pub fn reload(&self) {
        self.store.reload();
    }
}
