use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use super::types::{Example, ExampleStatus};
use crate::error::Result;
use crate::store::{Serializer, Store};

/// Aggregate statistics over every completed example, computed on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dump {
    /// Cumulative run time per file.
    pub file_totals: HashMap<String, f64>,
    pub meta: DumpMeta,
    pub examples: HashMap<String, Example>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpMeta {
    pub passes: u64,
    pub failures: u64,
    pub pending: u64,
    pub total_run_time: f64,
    pub average_run_time: f64,
    /// Earliest `started_at` across completed examples, RFC 3339 with
    /// microseconds. None when nothing carried a parseable timestamp.
    pub first_started_at: Option<String>,
    /// Latest `finished_at`, same format.
    pub last_finished_at: Option<String>,
}

/// Finished examples for one run. Once an id lands here it is never pending
/// or processing again for this run, short of an explicit retry re-seed.
pub struct CompletedStore {
    store: Store,
}

impl CompletedStore {
    pub fn open(uri: &str, serializer: Serializer, scope: &str) -> Result<Self> {
        Ok(Self {
            store: Store::open(uri, serializer, scope)?,
        })
    }

    pub fn merge(&self, entries: &HashMap<String, Example>) -> Result<()> {
        self.store.merge(entries)
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

    /// Walk every completed example and aggregate counts, per-file totals
    /// and the run's wall-clock envelope. O(n) over completed examples;
    /// only invoked on drain or for status reporting.
    pub fn dump(&self) -> Result<Dump> {
        let examples: HashMap<String, Example> = self.store.to_map()?;

        let mut file_totals: HashMap<String, f64> = HashMap::new();
        let mut passes = 0;
        let mut failures = 0;
        let mut pending = 0;
        let mut run_times: Vec<f64> = Vec::new();
        let mut first_started: Option<DateTime<FixedOffset>> = None;
        let mut last_finished: Option<DateTime<FixedOffset>> = None;

        for example in examples.values() {
            let run_time = example.run_time.unwrap_or(0.0);
            run_times.push(run_time);
            *file_totals.entry(example.file_path.clone()).or_insert(0.0) += run_time;

            match example.status {
                Some(ExampleStatus::Passed) => passes += 1,
                Some(ExampleStatus::Failed) => failures += 1,
                Some(ExampleStatus::Pending) => pending += 1,
                None => {}
            }

            if let Some(started) = parse_timestamp(example.started_at.as_deref())
                && first_started.is_none_or(|first| started < first)
            {
                first_started = Some(started);
            }

            if let Some(finished) = parse_timestamp(example.finished_at.as_deref())
                && last_finished.is_none_or(|last| finished > last)
            {
                last_finished = Some(finished);
            }
        }

        let total_run_time: f64 = run_times.iter().sum();
        let average_run_time = total_run_time / run_times.len().max(1) as f64;

        Ok(Dump {
            file_totals,
            meta: DumpMeta {
                passes,
                failures,
                pending,
                total_run_time,
                average_run_time,
                first_started_at: first_started.map(format_timestamp),
                last_finished_at: last_finished.map(format_timestamp),
            },
            examples,
        })
    }

    /// Write the dump as pretty JSON to `path`, creating parent directories.
    /// This report artifact is the only filesystem side effect owned by the
    /// coordination layer.
    pub fn dump_and_write(&self, path: &Path) -> Result<Dump> {
        let dump = self.dump()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(&dump).map_err(|e| crate::error::StoreError::Encode {
            key: path.display().to_string(),
            message: e.to_string(),
        })?;
        fs::write(path, json)?;

        Ok(dump)
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(value?).ok()
}

fn format_timestamp(value: DateTime<FixedOffset>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}
