//! Job runner lifecycle tests.
//!
//! Every path through the runner is driven with scripted filters, a lock that
//! counts acquisitions and releases, and a sink that records every publish.

use filtrate::lock::LockService;
use filtrate::types::{FileEvent, FilterJob, FilterSpec, LockHandle};
use filtrate::{JobOutcome, JobState};
use std::time::Duration;

mod helpers;

use helpers::{Behavior, CountingLock, Harness, RecordingSink, capture_logs, metadata, reference};

fn job(output_name: &str, symbol: &str, file_id: i64) -> FilterJob {
    let spec = FilterSpec::new(
        format!("{} filter", output_name),
        &["dat"],
        reference(symbol),
        output_name,
        "http://example.org/schemas/test",
    );
    FilterJob::new(spec, &FileEvent::new(file_id, true, "/data/sample.dat", "ds/sample.dat"))
}

#[tokio::test]
async fn test_success_publishes_once_and_releases() {
    let harness = Harness::new(&[("Returns", Behavior::Returns(metadata(&[("rows", "3")])))]);

    let outcome = harness.runner.run(job("DAT", "Returns", 7)).await;

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(outcome.state(), JobState::Success);
    assert_eq!(harness.calls(), 1);
    assert_eq!(harness.lock.acquired(), 1);
    assert_eq!(harness.lock.released(), 1);

    let published = harness.sink.published();
    assert_eq!(published.len(), 1);
    let request = &published[0];
    assert_eq!(request.task, "tardis_portal.datafile.save_metadata");
    assert_eq!(request.file_id, 7);
    assert_eq!(request.output_name, "DAT");
    assert_eq!(request.output_schema, "http://example.org/schemas/test");
    assert_eq!(request.metadata, metadata(&[("rows", "3")]));
}

#[tokio::test]
async fn test_empty_mapping_is_still_published() {
    let harness = Harness::new(&[("Empty", Behavior::Returns(metadata(&[])))]);

    let outcome = harness.runner.run(job("DAT", "Empty", 1)).await;

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(harness.sink.published().len(), 1);
    assert!(harness.sink.published()[0].metadata.is_empty());
}

#[tokio::test]
async fn test_no_result_publishes_nothing_and_releases() {
    let harness = Harness::new(&[("Nothing", Behavior::Nothing)]);

    let outcome = harness.runner.run(job("DAT", "Nothing", 2)).await;

    assert_eq!(outcome, JobOutcome::NoResult);
    assert_eq!(harness.calls(), 1);
    assert!(harness.sink.published().is_empty());
    assert_eq!(harness.lock.released(), 1);
}

#[tokio::test]
async fn test_panicking_filter_is_contained_and_releases() {
    let harness = Harness::new(&[("Panics", Behavior::Panics)]);
    let handle = LockHandle::for_filter("DAT", 3);

    let outcome = harness.runner.run(job("DAT", "Panics", 3)).await;

    assert_eq!(outcome, JobOutcome::FilterError);
    assert_eq!(outcome.state(), JobState::FilterError);
    assert!(harness.sink.published().is_empty());
    assert_eq!(harness.lock.acquired(), 1);
    assert_eq!(harness.lock.released(), 1);
    assert!(!harness.lock.inner.is_held(&handle));
}

#[tokio::test]
async fn test_unknown_reference_is_a_load_failure_and_releases() {
    let harness = Harness::new(&[]);

    let outcome = harness.runner.run(job("DAT", "Missing", 4)).await;

    assert_eq!(outcome, JobOutcome::LoadFailed);
    assert_eq!(harness.calls(), 0);
    assert!(harness.sink.published().is_empty());
    assert_eq!(harness.lock.acquired(), 1);
    assert_eq!(harness.lock.released(), 1);
}

#[tokio::test]
async fn test_invalid_tag_policy_is_a_load_failure() {
    let harness = Harness::new(&[("Returns", Behavior::Returns(metadata(&[("a", "1")])))]);
    let mut job = job("DAT", "Returns", 5);
    job.spec = job.spec.with_kwarg("tagsToFind", "not-a-list");

    let outcome = harness.runner.run(job).await;

    assert_eq!(outcome, JobOutcome::LoadFailed);
    assert_eq!(harness.built(), 0);
    assert_eq!(harness.calls(), 0);
    assert_eq!(harness.lock.released(), 1);
}

#[tokio::test]
async fn test_no_result_logs_exactly_one_error() {
    let harness = Harness::new(&[("Nothing", Behavior::Nothing)]);
    let (logs, _guard) = capture_logs();

    let outcome = harness.runner.run(job("DAT", "Nothing", 40)).await;

    assert_eq!(outcome, JobOutcome::NoResult);
    let errors = logs.errors();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].contains("Can't get metadata"));
    assert!(errors[0].contains("file_id=40"));
}

#[tokio::test]
async fn test_filter_panic_logs_exactly_one_error() {
    let harness = Harness::new(&[("Panics", Behavior::Panics)]);
    let (logs, _guard) = capture_logs();

    let outcome = harness.runner.run(job("DAT", "Panics", 41)).await;

    assert_eq!(outcome, JobOutcome::FilterError);
    let errors = logs.errors();
    assert_eq!(errors.len(), 1, "{:?}", errors);
    assert!(errors[0].contains("panicked"));
    assert!(errors[0].contains("scripted filter failure"));
}

#[tokio::test]
async fn test_success_logs_no_errors() {
    let harness = Harness::new(&[("Returns", Behavior::Returns(metadata(&[("a", "1")])))]);
    let (logs, _guard) = capture_logs();

    assert_eq!(harness.runner.run(job("DAT", "Returns", 42)).await, JobOutcome::Success);
    assert!(logs.errors().is_empty());
}

#[tokio::test]
async fn test_dropped_run_keeps_lock_until_filter_finishes() {
    let harness = Harness::new(&[(
        "Slow",
        Behavior::Sleeps(Duration::from_millis(300), metadata(&[("a", "1")])),
    )]);

    let abandoned = tokio::time::timeout(Duration::from_millis(50), harness.runner.run(job("DAT", "Slow", 43))).await;
    assert!(abandoned.is_err());

    // the first filter is still executing
    let second = harness.runner.run(job("DAT", "Slow", 43)).await;
    assert_eq!(second, JobOutcome::LockedOut);
    assert_eq!(harness.lock.released(), 0);

    for _ in 0..100 {
        if harness.lock.released() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(harness.calls(), 1);
    assert_eq!(harness.sink.published().len(), 1);
    assert_eq!(harness.lock.released(), 1);
    assert!(!harness.lock.inner.is_held(&LockHandle::for_filter("DAT", 43)));
}

#[tokio::test]
async fn test_held_lock_drops_job_without_releasing() {
    let harness = Harness::new(&[("Returns", Behavior::Returns(metadata(&[("a", "1")])))]);
    let handle = LockHandle::for_filter("DAT", 6);
    assert!(harness.lock.acquire(&handle, Duration::from_secs(60)).await.unwrap());

    let outcome = harness.runner.run(job("DAT", "Returns", 6)).await;

    assert_eq!(outcome, JobOutcome::LockedOut);
    assert!(!outcome.held_lock());
    assert_eq!(harness.calls(), 0);
    assert!(harness.sink.published().is_empty());
    assert_eq!(harness.lock.released(), 0);
    assert!(harness.lock.inner.is_held(&handle));
}

#[tokio::test]
async fn test_lock_service_error_fails_closed() {
    let harness = Harness::with_parts(
        &[("Returns", Behavior::Returns(metadata(&[("a", "1")])))],
        CountingLock::failing(),
        RecordingSink::new(),
    );

    let outcome = harness.runner.run(job("DAT", "Returns", 8)).await;

    assert_eq!(outcome, JobOutcome::LockedOut);
    assert_eq!(harness.calls(), 0);
    assert_eq!(harness.lock.released(), 0);
}

#[tokio::test]
async fn test_publish_failure_is_logged_not_propagated() {
    let harness = Harness::with_parts(
        &[("Returns", Behavior::Returns(metadata(&[("a", "1")])))],
        CountingLock::new(),
        RecordingSink::failing(),
    );

    let outcome = harness.runner.run(job("DAT", "Returns", 9)).await;

    assert_eq!(outcome, JobOutcome::Success);
    assert_eq!(harness.sink.published().len(), 1);
    assert_eq!(harness.lock.released(), 1);
}

#[tokio::test]
async fn test_tag_policy_filters_published_metadata() {
    let harness = Harness::new(&[(
        "Returns",
        Behavior::Returns(metadata(&[("title", "t"), ("author", "a"), ("secret", "s"), ("date", "d")])),
    )]);
    let mut job = job("DAT", "Returns", 10);
    job.spec = job
        .spec
        .with_kwarg("tagsToFind", serde_json::json!(["title", "secret", "date"]))
        .with_kwarg("tagsToExclude", serde_json::json!(["secret"]));

    let outcome = harness.runner.run(job).await;

    assert_eq!(outcome, JobOutcome::Success);
    let published = harness.sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].metadata, metadata(&[("title", "t"), ("date", "d")]));
}

#[tokio::test]
async fn test_concurrent_runs_of_same_pair_exclude_each_other() {
    let harness = Harness::new(&[(
        "Slow",
        Behavior::Sleeps(Duration::from_millis(100), metadata(&[("a", "1")])),
    )]);

    let (first, second) = tokio::join!(
        harness.runner.run(job("DAT", "Slow", 11)),
        harness.runner.run(job("DAT", "Slow", 11)),
    );

    let mut outcomes = [first, second];
    outcomes.sort_by_key(|outcome| outcome.to_string());
    assert_eq!(outcomes, [JobOutcome::LockedOut, JobOutcome::Success]);
    assert_eq!(harness.calls(), 1);
    assert_eq!(harness.sink.published().len(), 1);
    assert_eq!(harness.lock.acquired(), 1);
    assert_eq!(harness.lock.released(), 1);
}

#[tokio::test]
async fn test_lock_handle_is_case_insensitive_on_output_name() {
    let harness = Harness::new(&[(
        "Slow",
        Behavior::Sleeps(Duration::from_millis(100), metadata(&[("a", "1")])),
    )]);

    let (upper, lower) = tokio::join!(
        harness.runner.run(job("CSV", "Slow", 12)),
        harness.runner.run(job("csv", "Slow", 12)),
    );

    assert!(upper == JobOutcome::LockedOut || lower == JobOutcome::LockedOut);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_different_files_run_independently() {
    let harness = Harness::new(&[(
        "Slow",
        Behavior::Sleeps(Duration::from_millis(50), metadata(&[("a", "1")])),
    )]);

    let (first, second) = tokio::join!(
        harness.runner.run(job("DAT", "Slow", 13)),
        harness.runner.run(job("DAT", "Slow", 14)),
    );

    assert_eq!(first, JobOutcome::Success);
    assert_eq!(second, JobOutcome::Success);
    assert_eq!(harness.sink.published().len(), 2);
    assert_eq!(harness.lock.released(), 2);
}

#[tokio::test]
async fn test_release_count_matches_acquisitions_across_outcomes() {
    let harness = Harness::new(&[
        ("Returns", Behavior::Returns(metadata(&[("a", "1")]))),
        ("Nothing", Behavior::Nothing),
        ("Panics", Behavior::Panics),
    ]);

    let outcomes = vec![
        harness.runner.run(job("A", "Returns", 20)).await,
        harness.runner.run(job("B", "Nothing", 20)).await,
        harness.runner.run(job("C", "Panics", 20)).await,
        harness.runner.run(job("D", "Missing", 20)).await,
    ];

    assert_eq!(
        outcomes,
        vec![
            JobOutcome::Success,
            JobOutcome::NoResult,
            JobOutcome::FilterError,
            JobOutcome::LoadFailed,
        ]
    );
    assert!(outcomes.iter().all(JobOutcome::held_lock));
    assert_eq!(harness.lock.acquired(), 4);
    assert_eq!(harness.lock.released(), 4);
    assert_eq!(harness.lock.inner.held_count(), 0);
}
