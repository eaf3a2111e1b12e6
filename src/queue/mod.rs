//! Run-scoped work-tracking stores.
//!
//! Every example of a run lives in exactly one of three places: inside a
//! pending bucket, in the processing set while leased to a worker, or in the
//! completed set once finished. The stores here are thin specializations of
//! [`crate::store::Store`] that enforce that model:
//!
//! - **`pending`**: ordered bucket-id list, bucketing strategies, atomic
//!   bucket withdrawal.
//! - **`bucket`**: the ordered example list behind one bucket id.
//! - **`processing`**: leased examples tagged with owner and lease time.
//! - **`completed`**: terminal snapshots plus on-demand aggregate stats.
//! - **`workers`**: per-worker liveness timestamps and result counters.
//!
//! Runs are isolated by scope: all stores of a run live under its run-id
//! prefix and two runs never see each other's examples, buckets or locks.

pub mod bucket;
pub mod completed;
pub mod pending;
pub mod processing;
pub mod types;
pub mod workers;

pub use bucket::BucketStore;
pub use completed::{CompletedStore, Dump, DumpMeta};
pub use pending::{PendingStore, derive_run_time_bucket_maximum};
pub use processing::ProcessingStore;
pub use types::{Example, ExampleStatus, now_epoch};
pub use workers::WorkerStore;
