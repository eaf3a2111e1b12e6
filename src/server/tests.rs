//! Coordination Protocol Tests
//!
//! Drives the endpoint state machine end to end against the memory backend:
//! seeding, leasing, completion, retries, reclamation, statistics and the
//! report artifact. Transport concerns (routing, header parsing) are thin
//! axum plumbing and are not re-tested here.

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};

    use uuid::Uuid;

    use crate::config::Config;
    use crate::queue::types::{Example, ExampleStatus, now_epoch};
    use crate::server::handlers::{complete_and_pop, seed, stats, worker_exit_status};
    use crate::server::protocol::{PopOutcome, SeedRequest};
    use crate::server::state::AppState;

    fn state() -> std::sync::Arc<AppState> {
        AppState::new(Config::default())
    }

    fn run_id() -> String {
        format!("run-{}", Uuid::new_v4())
    }

    fn example(id: &str, file_path: &str) -> Example {
        Example::new(id, file_path)
    }

    fn result(example: &Example, status: ExampleStatus, run_time: f64) -> Example {
        let mut finished = example.clone();
        finished.status = Some(status);
        finished.run_time = Some(run_time);
        finished.started_at = Some("2026-08-07T10:00:00.000000Z".to_string());
        finished.finished_at = Some("2026-08-07T10:00:01.000000Z".to_string());
        finished
    }

    async fn seed_examples(state: &AppState, run_id: &str, examples: Vec<Example>) {
        seed(
            state,
            run_id,
            SeedRequest {
                examples,
                max_retries: None,
                run_time_bucket_maximum: None,
            },
        )
        .await
        .unwrap();
    }

    fn leased(outcome: PopOutcome) -> Vec<Example> {
        match outcome {
            PopOutcome::Leased(examples) => examples,
            other => panic!("expected a lease, got {other:?}"),
        }
    }

    // ============================================================
    // TEST 1: Poll state machine basics
    // ============================================================

    #[tokio::test]
    async fn test_pop_before_seed_waits() {
        let state = state();
        let run = run_id();

        let outcome = complete_and_pop(&state, &run, "w1", &[]).await.unwrap();
        assert!(matches!(outcome, PopOutcome::AwaitingSeed));
    }

    #[tokio::test]
    async fn test_seed_lease_complete_drain() {
        let state = state();
        let run = run_id();

        seed_examples(
            &state,
            &run,
            vec![example("a.rb:1", "a.rb"), example("b.rb:1", "b.rb")],
        )
        .await;

        // Two files, no timing data: two buckets, FIFO.
        let first = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        assert_eq!(first[0].id, "a.rb:1");

        let finished = result(&first[0], ExampleStatus::Passed, 0.4);
        let second = leased(
            complete_and_pop(&state, &run, "w1", &[finished])
                .await
                .unwrap(),
        );
        assert_eq!(second[0].id, "b.rb:1");

        // Last completion drains the run.
        let finished = result(&second[0], ExampleStatus::Passed, 0.1);
        let outcome = complete_and_pop(&state, &run, "w1", &[finished])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        // Subsequent polls from any worker see the same terminal state.
        let outcome = complete_and_pop(&state, &run, "w2", &[]).await.unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));
    }

    #[tokio::test]
    async fn test_pop_while_work_is_out_finds_nothing() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;

        let _mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        // w1 is alive (it just checked in), so its lease is not reclaimable
        // and there is nothing to report either.
        let outcome = complete_and_pop(&state, &run, "w2", &[]).await.unwrap();
        assert!(matches!(outcome, PopOutcome::NoWork));
    }

    // ============================================================
    // TEST 2: Lease bookkeeping
    // ============================================================

    #[tokio::test]
    async fn test_lease_moves_examples_into_processing() {
        let state = state();
        let run = run_id();

        seed_examples(
            &state,
            &run,
            vec![example("lease.rb:1", "lease.rb"), example("lease.rb:2", "lease.rb")],
        )
        .await;

        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        assert_eq!(mine.len(), 2);

        let processing = state.processing(&run).unwrap();
        let entries = processing.to_map().unwrap();
        assert_eq!(entries.len(), 2);
        for entry in entries.values() {
            assert_eq!(entry.worker_id.as_deref(), Some("w1"));
            assert!(entry.processing_started_at.is_some());
        }

        let mut pending = state.pending(&run).unwrap();
        assert!(pending.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_pops_never_share_a_bucket() {
        let state = state();
        let run = run_id();

        seed_examples(
            &state,
            &run,
            vec![example("a.rb:1", "a.rb"), example("b.rb:1", "b.rb")],
        )
        .await;

        let (one, two) = tokio::join!(
            complete_and_pop(&state, &run, "w1", &[]),
            complete_and_pop(&state, &run, "w2", &[]),
        );

        let one: HashSet<String> = leased(one.unwrap()).into_iter().map(|e| e.id).collect();
        let two: HashSet<String> = leased(two.unwrap()).into_iter().map(|e| e.id).collect();

        assert!(one.is_disjoint(&two));
        assert_eq!(one.len() + two.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        // A result for an id that was never leased must not complete it.
        let phantom = result(&example("ghost.rb:1", "ghost.rb"), ExampleStatus::Passed, 0.1);
        let outcome = complete_and_pop(&state, &run, "w2", &[phantom])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::NoWork));
        assert!(state.completed(&run).unwrap().is_empty().unwrap());

        // The legitimate owner still completes normally.
        let finished = result(&mine[0], ExampleStatus::Passed, 0.2);
        let outcome = complete_and_pop(&state, &run, "w1", &[finished])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));
    }

    // ============================================================
    // TEST 3: Retry accounting
    // ============================================================

    #[tokio::test]
    async fn test_flaky_example_retries_then_passes() {
        let state = state();
        let run = run_id();

        seed(
            &state,
            &run,
            SeedRequest {
                examples: vec![example("flaky.rb:1", "flaky.rb")],
                max_retries: Some(2),
                run_time_bucket_maximum: None,
            },
        )
        .await
        .unwrap();

        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        // First failure: re-queued, not completed, and handed right back.
        let failed = result(&mine[0], ExampleStatus::Failed, 0.3);
        let retried = leased(
            complete_and_pop(&state, &run, "w1", &[failed])
                .await
                .unwrap(),
        );
        assert_eq!(retried[0].id, "flaky.rb:1");
        assert!(state.completed(&run).unwrap().is_empty().unwrap());

        let counts: HashMap<String, u32> = state
            .failure_counts(&run)
            .unwrap()
            .multi_get(&["flaky.rb:1".to_string()])
            .unwrap();
        assert_eq!(counts.get("flaky.rb:1"), Some(&1));

        // Second attempt passes: terminal state is passed.
        let passed = result(&retried[0], ExampleStatus::Passed, 0.2);
        let outcome = complete_and_pop(&state, &run, "w1", &[passed])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        let dump = state.completed(&run).unwrap().dump().unwrap();
        assert_eq!(dump.meta.passes, 1);
        assert_eq!(dump.meta.failures, 0);
    }

    #[tokio::test]
    async fn test_retries_exhaust_into_failure() {
        let state = state();
        let run = run_id();

        // max_retries = 1: one retry allowed, the second failure is final.
        seed(
            &state,
            &run,
            SeedRequest {
                examples: vec![example("bad.rb:1", "bad.rb")],
                max_retries: Some(1),
                run_time_bucket_maximum: None,
            },
        )
        .await
        .unwrap();

        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        let failed = result(&mine[0], ExampleStatus::Failed, 0.3);
        let retried = leased(
            complete_and_pop(&state, &run, "w1", &[failed])
                .await
                .unwrap(),
        );

        let failed_again = result(&retried[0], ExampleStatus::Failed, 0.3);
        let outcome = complete_and_pop(&state, &run, "w1", &[failed_again])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        let dump = state.completed(&run).unwrap().dump().unwrap();
        assert_eq!(dump.meta.failures, 1);
        assert_eq!(dump.meta.passes, 0);
    }

    #[tokio::test]
    async fn test_no_retries_without_max_retries() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        let failed = result(&mine[0], ExampleStatus::Failed, 0.3);
        let outcome = complete_and_pop(&state, &run, "w1", &[failed])
            .await
            .unwrap();

        assert!(matches!(outcome, PopOutcome::Drained));
        let dump = state.completed(&run).unwrap().dump().unwrap();
        assert_eq!(dump.meta.failures, 1);
    }

    // ============================================================
    // TEST 4: Reclamation
    // ============================================================

    fn backdate_lease(state: &AppState, run: &str, worker: &str, by_seconds: u64) {
        let stale_at = now_epoch() - by_seconds;

        let processing = state.processing(run).unwrap();
        let entries: HashMap<String, Example> = processing
            .to_map()
            .unwrap()
            .into_iter()
            .map(|(id, mut e)| {
                e.processing_started_at = Some(stale_at);
                (id, e)
            })
            .collect();
        processing.merge(&entries).unwrap();

        state
            .worker(run, worker)
            .unwrap()
            .set_last_seen_at(stale_at)
            .unwrap();
    }

    #[tokio::test]
    async fn test_dead_workers_lease_is_reclaimed() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let _mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        // w1 went silent: lease and last heartbeat both past the window.
        backdate_lease(&state, &run, "w1", 120);

        let reclaimed = leased(complete_and_pop(&state, &run, "w2", &[]).await.unwrap());
        assert_eq!(reclaimed[0].id, "a.rb:1");

        // Ownership moved to the new worker on re-lease.
        let entries = state.processing(&run).unwrap().to_map().unwrap();
        assert_eq!(entries["a.rb:1"].worker_id.as_deref(), Some("w2"));
    }

    #[tokio::test]
    async fn test_slow_but_alive_worker_keeps_its_lease() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let _mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());

        // Old lease, but the worker checked in recently.
        backdate_lease(&state, &run, "w1", 120);
        state
            .worker(&run, "w1")
            .unwrap()
            .set_last_seen_at(now_epoch())
            .unwrap();

        let outcome = complete_and_pop(&state, &run, "w2", &[]).await.unwrap();
        assert!(matches!(outcome, PopOutcome::NoWork));

        let entries = state.processing(&run).unwrap().to_map().unwrap();
        assert_eq!(entries["a.rb:1"].worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_reclaimed_example_completes_under_new_owner() {
        let state = state();
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        backdate_lease(&state, &run, "w1", 120);

        let reclaimed = leased(complete_and_pop(&state, &run, "w2", &[]).await.unwrap());
        let finished = result(&reclaimed[0], ExampleStatus::Passed, 0.5);
        let outcome = complete_and_pop(&state, &run, "w2", &[finished])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        // The dead worker's stale submission for the same id is now a no-op.
        let stale = result(&mine[0], ExampleStatus::Failed, 9.0);
        let outcome = complete_and_pop(&state, &run, "w1", &[stale]).await.unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        let dump = state.completed(&run).unwrap().dump().unwrap();
        assert_eq!(dump.meta.passes, 1);
        assert_eq!(dump.meta.failures, 0);
    }

    // ============================================================
    // TEST 5: Seeding behavior
    // ============================================================

    #[tokio::test]
    async fn test_single_seed_guard_ignores_second_seed() {
        let mut config = Config::default();
        config.single_seed_per_run = true;
        let state = AppState::new(config);
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;

        let again = seed(
            &state,
            &run,
            SeedRequest {
                examples: vec![example("b.rb:1", "b.rb")],
                max_retries: None,
                run_time_bucket_maximum: None,
            },
        )
        .await
        .unwrap();

        assert!(!again);
        assert_eq!(state.pending(&run).unwrap().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seed_applies_previous_run_times() {
        let state = state();
        let id = format!("timed-{}.rb:1", Uuid::new_v4());

        // First run completes the example and records its run time.
        let first_run = run_id();
        seed_examples(&state, &first_run, vec![example(&id, "timed.rb")]).await;
        let mine = leased(
            complete_and_pop(&state, &first_run, "w1", &[])
                .await
                .unwrap(),
        );
        let finished = result(&mine[0], ExampleStatus::Passed, 4.25);
        complete_and_pop(&state, &first_run, "w1", &[finished])
            .await
            .unwrap();

        // Second run seeds the same id without an estimate and inherits it.
        let second_run = run_id();
        seed_examples(&state, &second_run, vec![example(&id, "timed.rb")]).await;

        let examples = leased(
            complete_and_pop(&state, &second_run, "w1", &[])
                .await
                .unwrap(),
        );
        assert_eq!(examples[0].expected_run_time, Some(4.25));
    }

    #[tokio::test]
    async fn test_seed_request_bucket_maximum_wins() {
        let state = state();
        let run = run_id();

        let mut a = example("a.rb:1", "a.rb");
        a.expected_run_time = Some(1.2);
        let mut b = example("a.rb:2", "a.rb");
        b.expected_run_time = Some(1.3);
        let mut c = example("a.rb:3", "a.rb");
        c.expected_run_time = Some(1.4);

        seed(
            &state,
            &run,
            SeedRequest {
                examples: vec![a, b, c],
                max_retries: None,
                run_time_bucket_maximum: Some(2.5),
            },
        )
        .await
        .unwrap();

        let first = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        assert_eq!(first.len(), 2);
        let second = leased(complete_and_pop(&state, &run, "w2", &[]).await.unwrap());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, "a.rb:3");
    }

    // ============================================================
    // TEST 6: Stats and worker status
    // ============================================================

    #[tokio::test]
    async fn test_stats_require_a_completed_example() {
        let state = state();
        let run = run_id();

        assert!(stats(&state, &run).unwrap().is_none());

        seed_examples(
            &state,
            &run,
            vec![example("a.rb:1", "a.rb"), example("b.rb:1", "b.rb")],
        )
        .await;
        assert!(stats(&state, &run).unwrap().is_none());

        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        let finished = result(&mine[0], ExampleStatus::Passed, 0.4);
        complete_and_pop(&state, &run, "w1", &[finished])
            .await
            .unwrap();

        let report = stats(&state, &run).unwrap().expect("stats after completion");
        assert_eq!(report.completed.meta.passes, 1);
        assert_eq!(report.pending.count, 0);
        assert_eq!(report.processing.count, 1);
    }

    #[tokio::test]
    async fn test_worker_exit_status_accounting() {
        let state = state();
        let run = run_id();

        seed_examples(
            &state,
            &run,
            vec![example("a.rb:1", "a.rb"), example("b.rb:1", "b.rb")],
        )
        .await;

        // No record, nothing completed: presumed failing.
        assert_eq!(worker_exit_status(&state, &run, "w1").unwrap(), 1);

        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        let failed = result(&mine[0], ExampleStatus::Failed, 0.3);
        complete_and_pop(&state, &run, "w1", &[failed])
            .await
            .unwrap();

        assert_eq!(worker_exit_status(&state, &run, "w1").unwrap(), 1);

        // A worker with no failure record on a run that has completed
        // examples reports clean.
        assert_eq!(worker_exit_status(&state, &run, "w2").unwrap(), 0);
    }

    // ============================================================
    // TEST 7: Report artifact
    // ============================================================

    #[tokio::test]
    async fn test_drain_writes_report_artifact() {
        let out = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.output_dir = Some(out.path().to_path_buf());
        let state = AppState::new(config);
        let run = run_id();

        seed_examples(&state, &run, vec![example("a.rb:1", "a.rb")]).await;
        let mine = leased(complete_and_pop(&state, &run, "w1", &[]).await.unwrap());
        let finished = result(&mine[0], ExampleStatus::Passed, 0.4);
        let outcome = complete_and_pop(&state, &run, "w1", &[finished])
            .await
            .unwrap();
        assert!(matches!(outcome, PopOutcome::Drained));

        let path = out.path().join(format!("report-{run}.json"));
        let raw = std::fs::read(&path).expect("report artifact written on drain");

        let report: crate::queue::Dump = serde_json::from_slice(&raw).unwrap();
        assert_eq!(report.meta.passes, 1);
        assert!(report.examples.contains_key("a.rb:1"));
    }
}
