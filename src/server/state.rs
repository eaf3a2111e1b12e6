//! Shared endpoint state.
//!
//! Store instances are cheap, request-local constructions over the shared
//! backend; only the configuration, the per-run local mutexes and the
//! shutdown token live for the life of the process.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::queue::{CompletedStore, PendingStore, ProcessingStore, WorkerStore};
use crate::store::{self, LockGuard, Store};

/// Scope for the cross-run example-id -> run-time table.
const RUN_TIMES_SCOPE: &str = "run_times";

pub struct AppState {
    pub config: Config,
    /// Serializes threads of this process per run before they contend on
    /// the backend lock.
    run_mutexes: DashMap<String, Arc<Mutex<()>>>,
    pub shutdown: CancellationToken,
}

/// Both halves of the per-run critical section: the in-process mutex and
/// the backend's named lock. Dropping the guard releases both.
pub struct RunLockGuard {
    _backend: LockGuard,
    _local: tokio::sync::OwnedMutexGuard<()>,
}

impl AppState {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            run_mutexes: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Enter the run's exclusive critical section. Blocks until both the
    /// local mutex and the backend lock are held.
    pub async fn run_lock(&self, run_id: &str) -> Result<RunLockGuard> {
        let mutex = self
            .run_mutexes
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let local = mutex.lock_owned().await;
        let backend = store::run_lock(&self.config.store_uri, run_id).await?;

        Ok(RunLockGuard {
            _backend: backend,
            _local: local,
        })
    }

    pub fn pending(&self, run_id: &str) -> Result<PendingStore> {
        PendingStore::open(
            &self.config.store_uri,
            self.config.serializer,
            &format!("{run_id}/pending"),
            self.config.group_by,
        )
    }

    pub fn processing(&self, run_id: &str) -> Result<ProcessingStore> {
        ProcessingStore::open(
            &self.config.store_uri,
            self.config.serializer,
            &format!("{run_id}/processing"),
        )
    }

    pub fn completed(&self, run_id: &str) -> Result<CompletedStore> {
        CompletedStore::open(
            &self.config.store_uri,
            self.config.serializer,
            &format!("{run_id}/completed"),
        )
    }

    pub fn failure_counts(&self, run_id: &str) -> Result<Store> {
        Store::open(
            &self.config.store_uri,
            self.config.serializer,
            &format!("{run_id}/failure_counts"),
        )
    }

    pub fn worker(&self, run_id: &str, worker_id: &str) -> Result<WorkerStore> {
        WorkerStore::open(
            &self.config.store_uri,
            self.config.serializer,
            &format!("{run_id}/workers/{worker_id}"),
        )
    }

    /// Example run times observed across runs, used to estimate bucket
    /// sizes for future seeds.
    pub fn run_times(&self) -> Result<Store> {
        Store::open(
            &self.config.store_uri,
            self.config.serializer,
            RUN_TIMES_SCOPE,
        )
    }
}
