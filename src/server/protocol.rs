//! Wire contract for the coordination endpoints.
//!
//! Request identity rides in headers: the run id selects the storage scope,
//! the worker id selects the worker registry entry. Workers drive their poll
//! loop off exactly four status codes: 200 success-with-body, 204 nothing
//! seeded yet, 404 no reportable state, 410 run fully drained.

use serde::{Deserialize, Serialize};

use crate::queue::{Dump, Example};

pub const RUN_ID_HEADER: &str = "x-run-id";
pub const WORKER_ID_HEADER: &str = "x-worker-id";
/// Exit-status hint: the worker's cumulative failed count.
pub const WORKER_STATUS_HEADER: &str = "x-worker-status";

pub const ENDPOINT_HEALTH: &str = "/health";
pub const ENDPOINT_HEARTBEAT: &str = "/heartbeat";
pub const ENDPOINT_SEED: &str = "/seed";
pub const ENDPOINT_POP: &str = "/pop";
pub const ENDPOINT_COMPLETE_AND_POP: &str = "/complete_and_pop";
pub const ENDPOINT_STATS: &str = "/stats";
pub const ENDPOINT_SHUTDOWN: &str = "/shutdown";

pub const OK_BODY: &str = "ok";
pub const WAITING_BODY: &str = "waiting for examples to be seeded";
pub const DRAINED_BODY: &str = "run drained, nothing left to hand out";
pub const NOT_FOUND_BODY: &str = "nothing here for that run and worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRequest {
    pub examples: Vec<Example>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time_bucket_maximum: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountStat {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub pending: CountStat,
    pub processing: CountStat,
    pub completed: Dump,
}

/// Outcome of one lease/complete pass, mapped onto the status-code contract
/// by the handler layer.
#[derive(Debug, Clone)]
pub enum PopOutcome {
    /// 200: examples leased to the calling worker.
    Leased(Vec<Example>),
    /// 204: nothing has been seeded for this run yet.
    AwaitingSeed,
    /// 410: pending and processing are empty, completed is not.
    Drained,
    /// 404: work is out with live workers and none can be handed over.
    NoWork,
}
