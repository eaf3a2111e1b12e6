//! Storage backend abstraction and scheme registry.
//!
//! A backend owns the persisted bytes for any number of scopes and provides
//! the named per-run lock used to serialize mutating sequences. Backends are
//! selected by URI scheme through a process-global registry, so additional
//! backends (e.g. a remote key-value service) can register their scheme
//! without modifying this module.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Result, StoreError};

/// RAII handle for a named run lock. Dropping the guard releases the lock,
/// on every exit path including panics and early returns.
pub struct LockGuard {
    _inner: Box<dyn Any + Send>,
}

impl LockGuard {
    pub fn new(inner: Box<dyn Any + Send>) -> Self {
        Self { _inner: inner }
    }
}

/// Byte-level key/value operations for a single scope.
pub trait StoreBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn multi_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Upsert many keys, last write wins per key.
    fn merge(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()>;

    fn delete(&self, keys: &[String]) -> Result<()>;

    /// Every key in the scope, reserved metadata keys included. Order is
    /// not significant.
    fn keys(&self) -> Result<Vec<String>>;

    fn clear(&self) -> Result<()>;
}

/// Factory for scoped backends plus the backend's lock service.
#[async_trait]
pub trait BackendProvider: Send + Sync {
    fn open(&self, scope: &str) -> Result<Arc<dyn StoreBackend>>;

    /// Acquire exclusive ownership of the named lock for one run. Blocks
    /// until the lock is free; there is no timeout at this layer.
    async fn lock(&self, run_id: &str) -> Result<LockGuard>;
}

/// Scheme and path components of a store URI such as `memory:///` or
/// `file:///var/lib/workpool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreUri {
    pub scheme: String,
    pub path: String,
}

impl StoreUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;

        if scheme.is_empty() {
            return Err(StoreError::InvalidUri(uri.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            path: rest.to_string(),
        })
    }
}

pub type ProviderFactory =
    Arc<dyn Fn(&StoreUri) -> Result<Arc<dyn BackendProvider>> + Send + Sync>;

static REGISTRY: LazyLock<DashMap<String, ProviderFactory>> = LazyLock::new(|| {
    let registry: DashMap<String, ProviderFactory> = DashMap::new();

    registry.insert(
        "memory".to_string(),
        Arc::new(|_uri: &StoreUri| {
            Ok(Arc::new(super::memory::MemoryProvider) as Arc<dyn BackendProvider>)
        }) as ProviderFactory,
    );
    registry.insert(
        "file".to_string(),
        Arc::new(|uri: &StoreUri| {
            Ok(Arc::new(super::file::FileProvider::new(&uri.path)) as Arc<dyn BackendProvider>)
        }) as ProviderFactory,
    );

    registry
});

/// Register a provider factory for a URI scheme. Later registrations for the
/// same scheme replace earlier ones.
pub fn register_backend(scheme: &str, factory: ProviderFactory) {
    REGISTRY.insert(scheme.to_string(), factory);
}

/// Resolve the provider for a store URI, failing with a configuration error
/// that names the scheme when no backend is registered for it.
pub fn provider_for(uri: &str) -> Result<Arc<dyn BackendProvider>> {
    let parsed = StoreUri::parse(uri)?;

    match REGISTRY.get(&parsed.scheme) {
        Some(factory) => (factory.value())(&parsed),
        None => Err(StoreError::UnsupportedScheme(parsed.scheme)),
    }
}

/// Acquire the named backend lock for a run without constructing a store.
pub async fn run_lock(uri: &str, run_id: &str) -> Result<LockGuard> {
    provider_for(uri)?.lock(run_id).await
}
