//! Generic keyed store.
//!
//! A `Store` binds one backend scope to a serializer and exposes typed
//! operations over it. Keys prefixed with the reserved marker are metadata
//! owned by store specializations and are hidden from `keys()`.
//!
//! Every mutation bumps a generation counter. Specializations memoize
//! derived values tagged with the generation they were read at and re-read
//! once the counter moves, so two instances observing the same backend scope
//! can resynchronize with an explicit [`Store::reload`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::backend::{self, StoreBackend};
use super::serializer::Serializer;
use crate::error::Result;

/// Keys starting with this marker are store-internal metadata.
pub const RESERVED_PREFIX: &str = "____";

pub struct Store {
    backend: Arc<dyn StoreBackend>,
    serializer: Serializer,
    scope: String,
    uri: String,
    generation: AtomicU64,
}

impl Store {
    pub fn open(uri: &str, serializer: Serializer, scope: &str) -> Result<Self> {
        let backend = backend::provider_for(uri)?.open(scope)?;

        Ok(Self {
            backend,
            serializer,
            scope: scope.to_string(),
            uri: uri.to_string(),
            generation: AtomicU64::new(0),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn serializer(&self) -> Serializer {
        self.serializer
    }

    /// Snapshot version for memoized reads. Bumped by every mutation through
    /// this instance and by `reload`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate memoized values so the next read observes writes made
    /// through other instances of the same backend scope.
    pub fn reload(&self) {
        self.bump();
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>> {
        match self.backend.get(key)? {
            Some(bytes) => Ok(Some(self.serializer.load(key, &bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<V: Serialize>(&self, key: &str, value: &V) -> Result<()> {
        let bytes = self.serializer.dump(key, value)?;
        self.backend.set(key, bytes)?;
        self.bump();
        Ok(())
    }

    pub fn multi_get<V: DeserializeOwned>(&self, keys: &[String]) -> Result<HashMap<String, V>> {
        let raw = self.backend.multi_get(keys)?;

        let mut out = HashMap::with_capacity(raw.len());
        for (key, bytes) in raw {
            let value = self.serializer.load(&key, &bytes)?;
            out.insert(key, value);
        }
        Ok(out)
    }

    /// Upsert many keys at once, last write wins per key.
    pub fn merge<V: Serialize>(&self, entries: &HashMap<String, V>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key.clone(), self.serializer.dump(key, value)?));
        }

        self.backend.merge(encoded)?;
        self.bump();
        Ok(())
    }

    pub fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        self.backend.delete(keys)?;
        self.bump();
        Ok(())
    }

    /// Every data key in the scope; reserved metadata keys are filtered out.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| !k.starts_with(RESERVED_PREFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.keys()?.is_empty())
    }

    pub fn any(&self) -> Result<bool> {
        Ok(!self.is_empty()?)
    }

    /// All data entries as a map, reserved keys excluded.
    pub fn to_map<V: DeserializeOwned>(&self) -> Result<HashMap<String, V>> {
        let keys = self.keys()?;
        self.multi_get(&keys)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear()?;
        self.bump();
        Ok(())
    }
}

/// A value memoized at a store generation. Stale once the store's counter
/// has moved past the recorded generation.
#[derive(Debug, Clone)]
pub struct Memo<T> {
    pub value: T,
    pub generation: u64,
}

impl<T> Memo<T> {
    pub fn new(value: T, generation: u64) -> Self {
        Self { value, generation }
    }

    pub fn fresh(&self, store: &Store) -> bool {
        self.generation == store.generation()
    }
}
