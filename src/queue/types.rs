use serde::{Deserialize, Serialize};

/// Terminal result of one executed example, as reported by a worker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExampleStatus {
    Passed,
    Failed,
    Pending,
}

impl ExampleStatus {
    pub const ALL: [ExampleStatus; 3] = [
        ExampleStatus::Passed,
        ExampleStatus::Failed,
        ExampleStatus::Pending,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExampleStatus::Passed => "passed",
            ExampleStatus::Failed => "failed",
            ExampleStatus::Pending => "pending",
        }
    }
}

impl std::fmt::Display for ExampleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of test work. The `id` is stable across retries; everything else
/// is lifecycle state filled in as the example moves through
/// pending -> processing -> completed.
///
/// An example is present in exactly one of the pending buckets, the
/// processing set, or the completed set at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    /// Absent until the example has been executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExampleStatus>,
    /// Estimate used only for bucketing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_run_time: Option<f64>,
    /// Seconds, set once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time: Option<f64>,
    /// RFC 3339, set on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Set while leased.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Lease timestamp, epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<u64>,
}

impl Example {
    pub fn new(id: &str, file_path: &str) -> Self {
        Self {
            id: id.to_string(),
            file_path: file_path.to_string(),
            full_description: None,
            line_number: None,
            status: None,
            expected_run_time: None,
            run_time: None,
            started_at: None,
            finished_at: None,
            worker_id: None,
            processing_started_at: None,
        }
    }

    /// Copy with lease ownership stamped on, as written into processing.
    pub fn leased_to(&self, worker_id: &str, at: u64) -> Self {
        let mut leased = self.clone();
        leased.worker_id = Some(worker_id.to_string());
        leased.processing_started_at = Some(at);
        leased
    }

    /// Copy with lease ownership cleared, as re-queued by reclamation.
    /// Ownership is reassigned only once the example is actually re-leased.
    pub fn released(&self) -> Self {
        let mut released = self.clone();
        released.worker_id = None;
        released.processing_started_at = None;
        released
    }
}

/// Current system time in whole seconds since the epoch.
pub fn now_epoch() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
