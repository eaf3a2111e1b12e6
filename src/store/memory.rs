//! Process-local in-memory backend.
//!
//! Data lives in a process-global map keyed by scope so that independent
//! store instances opened against the same scope observe each other's
//! writes, matching the behavior of the persistent backends. Nothing
//! survives process exit.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::backend::{BackendProvider, LockGuard, StoreBackend};
use crate::error::Result;

static DATA: LazyLock<DashMap<String, DashMap<String, Vec<u8>>>> = LazyLock::new(DashMap::new);

static LOCKS: LazyLock<DashMap<String, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

pub struct MemoryProvider;

#[async_trait]
impl BackendProvider for MemoryProvider {
    fn open(&self, scope: &str) -> Result<Arc<dyn StoreBackend>> {
        Ok(Arc::new(MemoryBackend {
            scope: scope.to_string(),
        }))
    }

    async fn lock(&self, run_id: &str) -> Result<LockGuard> {
        let mutex = LOCKS
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        Ok(LockGuard::new(Box::new(guard)))
    }
}

pub struct MemoryBackend {
    scope: String,
}

impl MemoryBackend {
    fn with_scope<T>(&self, f: impl FnOnce(&DashMap<String, Vec<u8>>) -> T) -> T {
        let map = DATA
            .entry(self.scope.clone())
            .or_insert_with(DashMap::new);
        f(map.value())
    }
}

impl StoreBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.with_scope(|map| map.get(key).map(|v| v.value().clone())))
    }

    fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self.with_scope(|map| {
            keys.iter()
                .filter_map(|key| map.get(key).map(|v| (key.clone(), v.value().clone())))
                .collect()
        }))
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.with_scope(|map| map.insert(key.to_string(), value));
        Ok(())
    }

    fn merge(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        self.with_scope(|map| {
            for (key, value) in entries {
                map.insert(key, value);
            }
        });
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<()> {
        self.with_scope(|map| {
            for key in keys {
                map.remove(key);
            }
        });
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.with_scope(|map| map.iter().map(|entry| entry.key().clone()).collect()))
    }

    fn clear(&self) -> Result<()> {
        DATA.remove(&self.scope);
        Ok(())
    }
}
