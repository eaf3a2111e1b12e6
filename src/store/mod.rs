//! Keyed storage layer.
//!
//! A namespaced, serializable key/value mapping with pluggable backends and
//! a named per-run lock. This is the only shared mutable resource in the
//! system; everything above it (queues, endpoint handlers) is built out of
//! scoped stores.
//!
//! ## Submodules
//! - **`serializer`**: JSON / MessagePack value codecs.
//! - **`backend`**: byte-level backend trait, lock guard, scheme registry.
//! - **`memory`**: process-local backend for single-process runs and tests.
//! - **`file`**: one-file-per-key backend with lock-file based run locks.
//! - **`base`**: the typed `Store` facade with generation-tagged memoization.

pub mod backend;
pub mod base;
pub mod file;
pub mod memory;
pub mod serializer;

pub use backend::{BackendProvider, LockGuard, StoreBackend, provider_for, register_backend, run_lock};
pub use base::{Memo, RESERVED_PREFIX, Store};
pub use serializer::Serializer;
