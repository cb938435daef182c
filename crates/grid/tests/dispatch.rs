//! End-to-end dispatch tests against in-memory provider and store
//! fakes, exercising admission control, the one-time bootstrap, and
//! batched completion polling together.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use buildgrid::error::BOOTSTRAP_EXIT_CODE;
use buildgrid::{GridCoordinator, GridError};
use buildgrid_core::buildspec::JobTarget;
use buildgrid_core::types::JobOutcome;
use common::{git_workspace, test_config, wait_until, FakeLogs, FakeProvider, FakeStore};

fn target(name: &str) -> JobTarget {
    JobTarget {
        selector: format!("suite::{name}"),
        invocation_id: Some(format!("suite.{name}()")),
    }
}

fn coordinator_with(
    concurrency: usize,
    provider: &Arc<FakeProvider>,
    store: &Arc<FakeStore>,
    workdir: &std::path::Path,
) -> GridCoordinator {
    common::init_tracing();
    GridCoordinator::new(
        test_config(concurrency),
        Arc::clone(provider) as _,
        Arc::clone(store) as _,
        Arc::new(FakeLogs::default()),
        workdir.to_path_buf(),
    )
}

#[tokio::test]
async fn concurrent_submissions_bootstrap_exactly_once() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(3, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    let mut submits = Vec::new();
    for i in 0..3 {
        let dispatcher = Arc::clone(&dispatcher);
        submits.push(tokio::spawn(async move {
            dispatcher.submit(&target(&format!("case_{i}"))).await
        }));
    }

    wait_until("all jobs submitted", || {
        let provider = Arc::clone(&provider);
        async move { provider.started_count().await == 3 }
    })
    .await;

    for id in provider.started_ids().await {
        provider.complete(&id, JobOutcome::Succeeded).await;
    }
    for submit in submits {
        let resolution = submit.await.unwrap().unwrap();
        assert_eq!(resolution.outcome, JobOutcome::Succeeded);
    }

    // Three racing submissions share one bootstrap.
    assert_eq!(provider.ensure_calls().await, 1);
    let uploads = store.uploads().await;
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].starts_with("test/source/testhost-tests-"));
    assert!(uploads[0].ends_with(".zip"));

    // Every job was parameterized with its own selector and target id.
    let requests = provider.started_requests().await;
    for request in &requests {
        assert!(request.privileged);
        assert!(request.buildspec.contains("BUILDGRID_TARGET_INVOCATION"));
        assert!(request.source_location.starts_with("test-bucket/test/source/"));
    }

    coordinator.close().await;
}

#[tokio::test]
async fn bootstrap_failure_is_sticky_and_fails_every_submission() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::failing());
    let coordinator = coordinator_with(2, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    for _ in 0..2 {
        let err = dispatcher.submit(&target("case")).await.unwrap_err();
        assert_matches!(err, GridError::Bootstrap(_));
        assert_eq!(err.exit_code(), BOOTSTRAP_EXIT_CODE);
    }

    // One attempt total; the failure was cached, not retried.
    assert_eq!(store.attempts().await, 1);
    assert_eq!(provider.ensure_calls().await, 0);
    assert_eq!(provider.started_count().await, 0);

    coordinator.close().await;
}

#[tokio::test]
async fn rejected_submission_returns_its_admission_token() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(1, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    provider.reject_next_start("quota exceeded").await;
    let err = dispatcher.submit(&target("first")).await.unwrap_err();
    assert_matches!(err, GridError::Submission(_));

    // With the token back, the next submission goes through at
    // concurrency one.
    let retry = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(&target("second")).await })
    };
    wait_until("retry submitted", || {
        let provider = Arc::clone(&provider);
        async move { provider.started_count().await == 1 }
    })
    .await;
    let id = provider.started_ids().await.remove(0);
    provider.complete(&id, JobOutcome::Succeeded).await;
    assert_eq!(
        retry.await.unwrap().unwrap().outcome,
        JobOutcome::Succeeded
    );

    coordinator.close().await;
}

#[tokio::test]
async fn concurrency_one_runs_jobs_strictly_in_sequence() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(1, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    let mut submits = Vec::new();
    for i in 0..3 {
        let dispatcher = Arc::clone(&dispatcher);
        submits.push(tokio::spawn(async move {
            dispatcher.submit(&target(&format!("case_{i}"))).await
        }));
    }

    for expected_started in 1..=3u32 {
        wait_until("next job submitted", || {
            let provider = Arc::clone(&provider);
            async move { provider.started_count().await == expected_started as usize }
        })
        .await;

        // No further job may start while this one is in flight.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(provider.started_count().await, expected_started as usize);

        let id = provider.started_ids().await.pop().unwrap();
        provider.complete(&id, JobOutcome::Succeeded).await;
    }

    for submit in submits {
        assert_eq!(
            submit.await.unwrap().unwrap().outcome,
            JobOutcome::Succeeded
        );
    }

    coordinator.close().await;
}

#[tokio::test]
async fn large_pending_sets_are_polled_in_bounded_batches() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(120, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    let mut submits = Vec::new();
    for i in 0..120 {
        let dispatcher = Arc::clone(&dispatcher);
        submits.push(tokio::spawn(async move {
            dispatcher.submit(&target(&format!("case_{i}"))).await
        }));
    }
    wait_until("all 120 submitted", || {
        let provider = Arc::clone(&provider);
        async move { provider.started_count().await == 120 }
    })
    .await;

    // Let at least one full poll cycle see the whole pending set.
    wait_until("a poll cycle ran", || {
        let provider = Arc::clone(&provider);
        async move { !provider.batch_sizes().await.is_empty() }
    })
    .await;

    for id in provider.started_ids().await {
        provider.complete(&id, JobOutcome::Succeeded).await;
    }
    for submit in submits {
        assert!(submit.await.unwrap().is_ok());
    }

    let sizes = provider.batch_sizes().await;
    assert!(sizes.iter().all(|&s| s <= 100), "oversized batch: {sizes:?}");
    assert!(
        sizes.contains(&100) && sizes.contains(&20),
        "expected a 100/20 split, got {sizes:?}"
    );

    coordinator.close().await;
}

#[tokio::test]
async fn failed_status_batch_is_retried_next_cycle() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(2, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    let mut submits = Vec::new();
    for i in 0..2 {
        let dispatcher = Arc::clone(&dispatcher);
        submits.push(tokio::spawn(async move {
            dispatcher.submit(&target(&format!("case_{i}"))).await
        }));
    }
    wait_until("both submitted", || {
        let provider = Arc::clone(&provider);
        async move { provider.started_count().await == 2 }
    })
    .await;

    let ids = provider.started_ids().await;
    provider.fail_batch_containing(&ids[0]).await;
    provider.complete(&ids[0], JobOutcome::Succeeded).await;
    provider.complete(&ids[1], JobOutcome::Failed).await;

    // One poisoned cycle delays resolution; it must not lose it.
    // Submission order is jittered, so compare outcomes as a set.
    let mut outcomes = Vec::new();
    for submit in submits {
        outcomes.push(submit.await.unwrap().unwrap().outcome);
    }
    outcomes.sort_by_key(|o| o.to_string());
    assert_eq!(outcomes, vec![JobOutcome::Failed, JobOutcome::Succeeded]);

    coordinator.close().await;
}

#[tokio::test]
async fn close_resolves_in_flight_submissions_with_shutdown() {
    let workspace = git_workspace();
    let provider = Arc::new(FakeProvider::default());
    let store = Arc::new(FakeStore::default());
    let coordinator = coordinator_with(1, &provider, &store, workspace.path());
    let dispatcher = coordinator.dispatcher();

    let submit = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.submit(&target("case")).await })
    };
    wait_until("job submitted", || {
        let provider = Arc::clone(&provider);
        async move { provider.started_count().await == 1 }
    })
    .await;

    coordinator.close().await;
    let err = submit.await.unwrap().unwrap_err();
    assert_matches!(err, GridError::Shutdown);
}
