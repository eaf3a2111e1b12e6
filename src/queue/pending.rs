//! Pending queue.
//!
//! Holds the ordered list of bucket ids for a run plus the run configuration
//! (bucket-size target, max-retry count). Buckets themselves live in their
//! own scopes under `<scope>/buckets/<id>`.
//!
//! Mutating sequences that must be atomic (`shift_bucket`, `merge`,
//! `push_examples`) expect the caller to hold the run lock; the store itself
//! only guarantees that each individual key write is last-write-wins.

use uuid::Uuid;

use super::bucket::BucketStore;
use super::types::Example;
use crate::config::GroupBy;
use crate::error::Result;
use crate::store::{Memo, Serializer, Store};

const BUCKET_IDS_KEY: &str = "____bucket_ids";
const MAX_RETRIES_KEY: &str = "____max_retries";
const RUN_TIME_BUCKET_MAXIMUM_KEY: &str = "____run_time_bucket_maximum";

pub struct PendingStore {
    store: Store,
    group_by: GroupBy,
    bucket_ids: Option<Memo<Vec<String>>>,
    max_retries: Option<Memo<u32>>,
    run_time_bucket_maximum: Option<Memo<Option<f64>>>,
}

impl PendingStore {
    pub fn open(uri: &str, serializer: Serializer, scope: &str, group_by: GroupBy) -> Result<Self> {
        Ok(Self {
            store: Store::open(uri, serializer, scope)?,
            group_by,
            bucket_ids: None,
            max_retries: None,
            run_time_bucket_maximum: None,
        })
    }

    pub fn max_retries(&mut self) -> Result<u32> {
        if let Some(memo) = self.max_retries.as_ref().filter(|m| m.fresh(&self.store)) {
            return Ok(memo.value);
        }

        let value: u32 = self.store.get(MAX_RETRIES_KEY)?.unwrap_or(0);
        self.max_retries = Some(Memo::new(value, self.store.generation()));
        Ok(value)
    }

    pub fn set_max_retries(&mut self, value: u32) -> Result<()> {
        self.store.set(MAX_RETRIES_KEY, &value)?;
        self.max_retries = Some(Memo::new(value, self.store.generation()));
        Ok(())
    }

    pub fn run_time_bucket_maximum(&mut self) -> Result<Option<f64>> {
        if let Some(memo) = self
            .run_time_bucket_maximum
            .as_ref()
            .filter(|m| m.fresh(&self.store))
        {
            return Ok(memo.value);
        }

        let value: Option<f64> = self.store.get(RUN_TIME_BUCKET_MAXIMUM_KEY)?;
        self.run_time_bucket_maximum = Some(Memo::new(value, self.store.generation()));
        Ok(value)
    }

    pub fn set_run_time_bucket_maximum(&mut self, value: f64) -> Result<()> {
        self.store.set(RUN_TIME_BUCKET_MAXIMUM_KEY, &value)?;
        self.run_time_bucket_maximum = Some(Memo::new(Some(value), self.store.generation()));
        Ok(())
    }

    pub fn bucket_ids(&mut self) -> Result<Vec<String>> {
        if let Some(memo) = self.bucket_ids.as_ref().filter(|m| m.fresh(&self.store)) {
            return Ok(memo.value.clone());
        }

        let ids: Vec<String> = self.store.get(BUCKET_IDS_KEY)?.unwrap_or_default();
        self.bucket_ids = Some(Memo::new(ids.clone(), self.store.generation()));
        Ok(ids)
    }

    fn set_bucket_ids(&mut self, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            self.store.delete(&[BUCKET_IDS_KEY.to_string()])?;
        } else {
            self.store.set(BUCKET_IDS_KEY, &ids)?;
        }

        self.bucket_ids = Some(Memo::new(ids, self.store.generation()));
        Ok(())
    }

    /// Number of dispatchable buckets, not of stored keys.
    pub fn len(&mut self) -> Result<usize> {
        Ok(self.bucket_ids()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.bucket_ids()?.is_empty())
    }

    /// Group the given examples into buckets per the active strategy, write
    /// each group under a fresh bucket id and append the ids to the dispatch
    /// list. Existing buckets are not touched. Examples are expected in
    /// seed order (sorted by file for file grouping).
    pub fn merge(&mut self, examples: &[Example]) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }

        let groups = self.grouped_examples(examples)?;

        let mut ids = self.bucket_ids()?;
        for group in &groups {
            ids.push(self.write_bucket(group)?);
        }

        self.set_bucket_ids(ids)
    }

    /// Pop the first bucket id, FIFO. The withdrawal and the list update are
    /// one step; callers serialize via the run lock.
    pub fn shift_bucket(&mut self) -> Result<Option<String>> {
        let mut ids = self.bucket_ids()?;
        if ids.is_empty() {
            return Ok(None);
        }

        let bucket_id = ids.remove(0);
        self.set_bucket_ids(ids)?;
        Ok(Some(bucket_id))
    }

    /// Create one new bucket holding exactly these examples and append it.
    /// Used by reclamation and failure retries.
    pub fn push_examples(&mut self, examples: &[Example]) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }

        let bucket_id = self.write_bucket(examples)?;

        let mut ids = self.bucket_ids()?;
        ids.push(bucket_id);
        self.set_bucket_ids(ids)
    }

    pub fn bucket_store_for(&self, bucket_id: &str) -> Result<BucketStore> {
        let scope = format!("{}/buckets/{}", self.store.scope(), bucket_id);
        BucketStore::open(self.store.uri(), self.store.serializer(), &scope)
    }

    pub fn delete_bucket(&self, bucket_id: &str) -> Result<()> {
        self.bucket_store_for(bucket_id)?.clear()
    }

    /// Delete every referenced bucket's storage, then the id list itself.
    pub fn clear(&mut self) -> Result<()> {
        for bucket_id in self.bucket_ids()? {
            self.delete_bucket(&bucket_id)?;
        }

        self.bucket_ids = None;
        self.max_retries = None;
        self.run_time_bucket_maximum = None;
        self.store.clear()
    }

    pub fn reload(&mut self) {
        self.bucket_ids = None;
        self.max_retries = None;
        self.run_time_bucket_maximum = None;
        self.store.reload();
    }

    fn write_bucket(&self, examples: &[Example]) -> Result<String> {
        let bucket_id = Uuid::new_v4().to_string();
        self.bucket_store_for(&bucket_id)?.set_examples(examples)?;
        Ok(bucket_id)
    }

    fn grouped_examples(&mut self, examples: &[Example]) -> Result<Vec<Vec<Example>>> {
        let maximum = self.run_time_bucket_maximum()?.filter(|m| *m > 0.0);

        let groups = match (maximum, self.group_by) {
            (Some(maximum), GroupBy::Timings) => group_by_timings(examples, maximum),
            _ => group_by_file(examples),
        };

        Ok(groups)
    }
}

/// Each maximal contiguous run of a single `file_path` becomes one bucket.
fn group_by_file(examples: &[Example]) -> Vec<Vec<Example>> {
    let mut buckets: Vec<Vec<Example>> = Vec::new();

    for example in examples {
        match buckets.last_mut() {
            Some(current) if current[0].file_path == example.file_path => {
                current.push(example.clone());
            }
            _ => buckets.push(vec![example.clone()]),
        }
    }

    buckets
}

/// Accumulate examples until the summed estimate would exceed `maximum`.
/// An example with no estimate counts as `maximum` itself. A bucket is
/// closed only when it already holds at least one example, so an oversized
/// example still lands in a bucket of its own.
fn group_by_timings(examples: &[Example], maximum: f64) -> Vec<Vec<Example>> {
    let mut buckets: Vec<Vec<Example>> = Vec::new();
    let mut current: Vec<Example> = Vec::new();
    let mut estimated_total = 0.0;

    for example in examples {
        let estimate = example.expected_run_time.unwrap_or(maximum);
        estimated_total += estimate;

        if estimated_total > maximum && !current.is_empty() {
            buckets.push(std::mem::take(&mut current));
            estimated_total = estimate;
        }

        current.push(example.clone());
    }

    if !current.is_empty() {
        buckets.push(current);
    }

    buckets
}

/// Bucket-maximum policy when neither the seed request nor the
/// configuration pins one: the total of the known estimates spread across
/// the configured worker count. None when no example carries an estimate.
pub fn derive_run_time_bucket_maximum(examples: &[Example], workers: u32) -> Option<f64> {
    let known: Vec<f64> = examples.iter().filter_map(|e| e.expected_run_time).collect();
    if known.is_empty() {
        return None;
    }

    let total: f64 = known.iter().sum();
    Some(total / f64::from(workers.max(1)))
}
