//! Endpoint handlers.
//!
//! The request-level state machine: Seed, Pop, CompleteAndPop, Stats,
//! Heartbeat, Health, Shutdown. Mutating sequences run inside the per-run
//! critical section from [`AppState::run_lock`]; the lock boundary is the
//! atomicity boundary, so a storage error aborts the whole operation and the
//! caller retries the network call without assuming partial success.
//!
//! Worker liveness refreshes and run-time bookkeeping deliberately happen
//! outside the lock: they are monotonic, single-owner-per-worker updates
//! that tolerate last-write-wins races.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::Extension;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::protocol::*;
use super::state::AppState;
use crate::error::Result;
use crate::queue::{Example, ExampleStatus, PendingStore, ProcessingStore};
use crate::queue::{derive_run_time_bucket_maximum, now_epoch};

pub async fn handle_health(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    touch_if_identified(&state, &headers);
    plain(StatusCode::OK, OK_BODY)
}

pub async fn handle_heartbeat(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    touch_if_identified(&state, &headers);
    plain(StatusCode::OK, OK_BODY)
}

pub async fn handle_seed(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SeedRequest>,
) -> Response {
    let Some((run_id, worker_id)) = identity(&headers) else {
        return plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    };
    touch_worker(&state, &run_id, &worker_id);

    match seed(&state, &run_id, request).await {
        Ok(newly_seeded) => {
            if newly_seeded {
                tracing::info!("Seeded run {run_id}");
            } else {
                tracing::debug!("Run {run_id} already seeded, ignoring");
            }
            plain(StatusCode::OK, OK_BODY)
        }
        Err(e) => server_error("seed", &e),
    }
}

pub async fn handle_pop(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some((run_id, worker_id)) = identity(&headers) else {
        return plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    };
    touch_worker(&state, &run_id, &worker_id);

    match complete_and_pop(&state, &run_id, &worker_id, &[]).await {
        Ok(outcome) => with_worker_status(pop_response(outcome), &state, &run_id, &worker_id),
        Err(e) => server_error("pop", &e),
    }
}

pub async fn handle_complete_and_pop(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(results): Json<Vec<Example>>,
) -> Response {
    let Some((run_id, worker_id)) = identity(&headers) else {
        return plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    };
    touch_worker(&state, &run_id, &worker_id);

    match complete_and_pop(&state, &run_id, &worker_id, &results).await {
        Ok(outcome) => with_worker_status(pop_response(outcome), &state, &run_id, &worker_id),
        Err(e) => server_error("complete_and_pop", &e),
    }
}

pub async fn handle_stats(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(run_id) = run_id(&headers) else {
        return plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY);
    };
    touch_if_identified(&state, &headers);

    match stats(&state, &run_id) {
        Ok(Some(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(None) => plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
        Err(e) => server_error("stats", &e),
    }
}

pub async fn handle_shutdown(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    touch_if_identified(&state, &headers);

    if state.config.single_run {
        let shutdown = state.shutdown.clone();
        tokio::spawn(async move {
            // Give the socket a moment to flush the response.
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        });
    }

    plain(StatusCode::OK, OK_BODY)
}

pub async fn handle_not_found() -> Response {
    plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY)
}

// --- endpoint state machine ---

/// Load a run's examples into the pending queue. Returns false when the
/// single-seed guard swallowed the request.
pub async fn seed(state: &AppState, run_id: &str, request: SeedRequest) -> Result<bool> {
    let mut examples = request.examples;

    // Fill in estimates from run times observed in earlier runs.
    let run_times = state.run_times()?;
    let ids: Vec<String> = examples.iter().map(|e| e.id.clone()).collect();
    let observed: HashMap<String, f64> = run_times.multi_get(&ids)?;
    for example in &mut examples {
        if example.expected_run_time.is_none()
            && let Some(run_time) = observed.get(&example.id)
        {
            example.expected_run_time = Some(*run_time);
        }
    }

    let _guard = state.run_lock(run_id).await?;

    let mut pending = state.pending(run_id)?;
    if state.config.single_seed_per_run && !pending.is_empty()? {
        return Ok(false);
    }

    let maximum = request
        .run_time_bucket_maximum
        .or(state.config.run_time_bucket_maximum)
        .or_else(|| derive_run_time_bucket_maximum(&examples, state.config.seed_worker_count));
    if let Some(maximum) = maximum {
        pending.set_run_time_bucket_maximum(maximum)?;
    }

    pending.set_max_retries(request.max_retries.unwrap_or(0))?;
    pending.merge(&examples)?;

    Ok(true)
}

/// The lease/complete algorithm: finalize or retry the submitted results,
/// then withdraw the next bucket for the calling worker, reclaiming
/// abandoned leases when the queue looks empty but work is still out.
pub async fn complete_and_pop(
    state: &AppState,
    run_id: &str,
    worker_id: &str,
    results: &[Example],
) -> Result<PopOutcome> {
    record_run_times(state, results)?;

    let mut finalized_tally: HashMap<ExampleStatus, u64> = HashMap::new();
    let mut drained = false;

    let outcome = {
        let _guard = state.run_lock(run_id).await?;

        let mut pending = state.pending(run_id)?;
        let processing = state.processing(run_id)?;
        let completed = state.completed(run_id)?;
        let failure_counts = state.failure_counts(run_id)?;

        // 1. Classify submissions. Ids no longer in processing were already
        // reclaimed and completed elsewhere; skip them silently.
        let ids: Vec<String> = results.iter().map(|e| e.id.clone()).collect();
        let in_processing = processing.multi_get(&ids)?;
        let prior_failures: HashMap<String, u32> = failure_counts.multi_get(&ids)?;
        let max_retries = pending.max_retries()?;

        let mut finals: HashMap<String, Example> = HashMap::new();
        let mut retries: Vec<Example> = Vec::new();

        for example in results {
            if !in_processing.contains_key(&example.id) {
                tracing::debug!("Ignoring stale result for {}", example.id);
                continue;
            }

            let failures = prior_failures.get(&example.id).copied().unwrap_or(0);
            let retry_eligible = example.status == Some(ExampleStatus::Failed)
                && max_retries > 0
                && failures < max_retries;

            if retry_eligible {
                retries.push(example.clone());
            } else {
                finals.insert(example.id.clone(), example.clone());
            }
        }

        let mut processed_ids: Vec<String> = finals.keys().cloned().collect();
        processed_ids.extend(retries.iter().map(|e| e.id.clone()));

        completed.merge(&finals)?;
        processing.delete(&processed_ids)?;

        if !retries.is_empty() {
            let requeued: Vec<Example> = retries.iter().map(|e| e.released()).collect();
            pending.push_examples(&requeued)?;

            let bumped: HashMap<String, u32> = retries
                .iter()
                .map(|e| {
                    let count = prior_failures.get(&e.id).copied().unwrap_or(0) + 1;
                    (e.id.clone(), count)
                })
                .collect();
            failure_counts.merge(&bumped)?;

            tracing::info!("Re-queued {} failed example(s) for retry", retries.len());
        }

        for example in finals.values() {
            if let Some(status) = example.status {
                *finalized_tally.entry(status).or_insert(0) += 1;
            }
        }

        // 2. Withdraw the next bucket, or work out why there is none.
        let leased = lease_next(&mut pending, &processing, worker_id)?;

        if !leased.is_empty() {
            PopOutcome::Leased(leased)
        } else if pending.is_empty()? && processing.is_empty()? && completed.is_empty()? {
            PopOutcome::AwaitingSeed
        } else if completed.any()? && processing.is_empty()? {
            drained = true;
            PopOutcome::Drained
        } else {
            // 3. Reclaim leases whose worker has gone silent, then retry the
            // withdrawal so this caller gets the reclaimed work immediately.
            let expired = expired_examples(state, run_id, &processing)?;

            if expired.is_empty() {
                PopOutcome::NoWork
            } else {
                tracing::warn!("Reclaiming {} abandoned example(s)", expired.len());

                let requeued: Vec<Example> = expired.values().map(|e| e.released()).collect();
                let expired_ids: Vec<String> = expired.keys().cloned().collect();
                pending.push_examples(&requeued)?;
                processing.delete(&expired_ids)?;

                let leased = lease_next(&mut pending, &processing, worker_id)?;
                if leased.is_empty() {
                    PopOutcome::NoWork
                } else {
                    PopOutcome::Leased(leased)
                }
            }
        }
    };

    if !finalized_tally.is_empty() {
        state
            .worker(run_id, worker_id)?
            .add_status_counts(&finalized_tally)?;
    }

    if drained && let Some(dir) = &state.config.output_dir {
        let path = dir.join(format!("report-{run_id}.json"));
        state.completed(run_id)?.dump_and_write(&path)?;
        tracing::info!("Wrote run report to {}", path.display());
    }

    Ok(outcome)
}

/// Completed-set statistics, or None when nothing has completed yet. Pure
/// reads; never takes the run lock, so a stats poller cannot block workers.
pub fn stats(state: &AppState, run_id: &str) -> Result<Option<StatsResponse>> {
    let dump = state.completed(run_id)?.dump()?;
    if dump.examples.is_empty() {
        return Ok(None);
    }

    let mut pending = state.pending(run_id)?;
    let processing = state.processing(run_id)?;

    Ok(Some(StatsResponse {
        pending: CountStat {
            count: pending.len()?,
        },
        processing: CountStat {
            count: processing.len()?,
        },
        completed: dump,
    }))
}

/// Withdraw the first pending bucket and move its examples into processing,
/// stamped with the worker's ownership. Caller holds the run lock.
fn lease_next(
    pending: &mut PendingStore,
    processing: &ProcessingStore,
    worker_id: &str,
) -> Result<Vec<Example>> {
    let Some(bucket_id) = pending.shift_bucket()? else {
        return Ok(Vec::new());
    };

    let mut bucket = pending.bucket_store_for(&bucket_id)?;
    let examples = bucket.examples()?;
    let leased_at = now_epoch();

    let entries: HashMap<String, Example> = examples
        .iter()
        .map(|e| (e.id.clone(), e.leased_to(worker_id, leased_at)))
        .collect();

    processing.merge(&entries)?;
    bucket.clear()?;

    tracing::debug!(
        "Leased bucket {} ({} examples) to worker {}",
        bucket_id,
        examples.len(),
        worker_id
    );

    Ok(examples)
}

/// Processing entries whose lease started more than the expiry window ago
/// AND whose owning worker has not checked in within that window. An old
/// lease alone is not enough; a slow-but-alive worker keeps its lease.
fn expired_examples(
    state: &AppState,
    run_id: &str,
    processing: &ProcessingStore,
) -> Result<HashMap<String, Example>> {
    if !processing.any()? {
        return Ok(HashMap::new());
    }

    let cutoff = now_epoch().saturating_sub(state.config.expiry_window().as_secs());
    let mut last_seen_by_worker: HashMap<String, u64> = HashMap::new();
    let mut expired = HashMap::new();

    for (id, example) in processing.to_map()? {
        let Some(owner) = example.worker_id.clone() else {
            continue;
        };
        let Some(leased_at) = example.processing_started_at else {
            continue;
        };
        if leased_at >= cutoff {
            continue;
        }

        let last_seen = match last_seen_by_worker.entry(owner) {
            std::collections::hash_map::Entry::Occupied(entry) => *entry.get(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let last_seen = state
                    .worker(run_id, entry.key())?
                    .last_seen_at()?
                    .unwrap_or(0);
                *entry.insert(last_seen)
            }
        };

        if last_seen < cutoff {
            expired.insert(id, example);
        }
    }

    Ok(expired)
}

/// Exit-status hint for the calling worker: its cumulative failed count, 0
/// for a clean worker on a completed run, 1 for a worker with no record on
/// a run that completed nothing.
pub fn worker_exit_status(state: &AppState, run_id: &str, worker_id: &str) -> Result<u64> {
    match state.worker(run_id, worker_id)?.failed_count()? {
        Some(failed) => Ok(failed),
        None if state.completed(run_id)?.any()? => Ok(0),
        None => Ok(1),
    }
}

fn record_run_times(state: &AppState, results: &[Example]) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }

    let run_times: HashMap<String, f64> = results
        .iter()
        .filter_map(|e| e.run_time.map(|t| (e.id.clone(), t)))
        .collect();

    state.run_times()?.merge(&run_times)
}

// --- request plumbing ---

fn run_id(headers: &HeaderMap) -> Option<String> {
    let run_id = headers.get(RUN_ID_HEADER)?.to_str().ok()?;
    (!run_id.is_empty()).then(|| run_id.to_string())
}

fn identity(headers: &HeaderMap) -> Option<(String, String)> {
    let run_id = run_id(headers)?;
    let worker_id = headers.get(WORKER_ID_HEADER)?.to_str().ok()?;
    (!worker_id.is_empty()).then(|| (run_id, worker_id.to_string()))
}

/// Refresh the worker's liveness record. Runs before any lock to keep lock
/// hold time down; a failure here is logged, not fatal to the request.
fn touch_worker(state: &AppState, run_id: &str, worker_id: &str) {
    let result = state
        .worker(run_id, worker_id)
        .and_then(|mut worker| worker.record_contact(now_epoch()));

    if let Err(e) = result {
        tracing::warn!("Failed to record contact for worker {worker_id}: {e}");
    }
}

fn touch_if_identified(state: &AppState, headers: &HeaderMap) {
    if let Some((run_id, worker_id)) = identity(headers) {
        touch_worker(state, &run_id, &worker_id);
    }
}

fn pop_response(outcome: PopOutcome) -> Response {
    match outcome {
        PopOutcome::Leased(examples) => (StatusCode::OK, Json(examples)).into_response(),
        // 204 carries no body by definition; the status code is the signal.
        PopOutcome::AwaitingSeed => StatusCode::NO_CONTENT.into_response(),
        PopOutcome::Drained => plain(StatusCode::GONE, DRAINED_BODY),
        PopOutcome::NoWork => plain(StatusCode::NOT_FOUND, NOT_FOUND_BODY),
    }
}

fn with_worker_status(
    mut response: Response,
    state: &AppState,
    run_id: &str,
    worker_id: &str,
) -> Response {
    match worker_exit_status(state, run_id, worker_id) {
        Ok(status) => {
            if let Ok(value) = HeaderValue::from_str(&status.to_string()) {
                response.headers_mut().insert(WORKER_STATUS_HEADER, value);
            }
        }
        Err(e) => tracing::warn!("Failed to compute worker status: {e}"),
    }

    response
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, [(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

fn server_error(operation: &str, err: &crate::error::StoreError) -> Response {
    tracing::error!("{operation} failed: {err}");
    plain(StatusCode::INTERNAL_SERVER_ERROR, "storage failure, retry the call")
}
