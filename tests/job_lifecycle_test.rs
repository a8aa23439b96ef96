//! Job lifecycle integration tests.
//!
//! Drives the full path from admission through the worker pool to a
//! terminal status, using scripted encoder behaviours in place of ffmpeg.

mod common;

use std::time::Duration;

use common::{FakeEncoder, TestHarness};
use recast::config::Config;
use recast::error::WORKER_LOST;
use recast::invoker::EncodeParams;
use recast::registry::{Job, JobRegistry, JobStatus};

const DEADLINE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Queued -> InProgress -> Succeeded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_convert_succeed() {
    let harness = TestHarness::with_workers(1);
    let payload = b"pretend this is audio";

    let job = harness.submit("track.mp3", payload).await;
    assert_eq!(job.status, JobStatus::Queued);

    let done = harness
        .wait_for_status(job.id, JobStatus::Succeeded, DEADLINE)
        .await;

    let file_name = done.result.expect("succeeded job has no result");
    assert_eq!(file_name, format!("{}.aac", job.id));
    assert!(done.error.is_none());
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());

    // The artifact landed in the durable store with the converted content
    // (the scripted encoder copies input to output).
    let stored = harness.ctx.store.root().join(&file_name);
    assert_eq!(std::fs::read(&stored).unwrap(), payload);

    // The scratch slot was released: nothing of this job remains staged.
    let leftover: Vec<_> = std::fs::read_dir(harness.ctx.staging.root())
        .unwrap()
        .collect();
    assert!(leftover.is_empty(), "scratch files survived: {leftover:?}");
}

// ---------------------------------------------------------------------------
// Failure classification
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unsupported_input_fails_with_classification() {
    let harness = TestHarness::build(Config::default(), FakeEncoder::RejectInput, 1);

    let job = harness.submit("not-audio.bin", b"\x00\x01garbage").await;
    let done = harness
        .wait_for_status(job.id, JobStatus::Failed, DEADLINE)
        .await;

    let error = done.error.expect("failed job has no error detail");
    assert!(
        error.contains("encoder rejected input"),
        "unexpected classification: {error}"
    );
    assert!(done.result.is_none());

    // Failure paths release scratch files too.
    let leftover: Vec<_> = std::fs::read_dir(harness.ctx.staging.root())
        .unwrap()
        .collect();
    assert!(leftover.is_empty());
}

#[tokio::test]
async fn encoder_crash_records_exit_detail() {
    let harness = TestHarness::build(Config::default(), FakeEncoder::Crash, 1);

    let job = harness.submit("track.mp3", b"data").await;
    let done = harness
        .wait_for_status(job.id, JobStatus::Failed, DEADLINE)
        .await;

    let error = done.error.unwrap();
    assert!(error.contains("encoder exited with"), "got: {error}");
    assert!(error.contains("Segmentation fault"), "got: {error}");
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hung_encoder_is_killed_on_timeout() {
    let mut config = Config::default();
    config.jobs.convert_timeout_secs = 1;
    let harness = TestHarness::build(config, FakeEncoder::Hang, 1);

    let job = harness.submit("track.mp3", b"data").await;
    let done = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(10))
        .await;

    let error = done.error.unwrap();
    assert!(error.contains("timed out"), "got: {error}");
}

#[tokio::test]
async fn timeout_leaves_no_encoder_process_behind() {
    let mut config = Config::default();
    config.jobs.convert_timeout_secs = 1;
    let harness = TestHarness::build(config, FakeEncoder::HangWithPid, 1);

    let job = harness.submit("track.mp3", b"data").await;
    let done = harness
        .wait_for_status(job.id, JobStatus::Failed, Duration::from_secs(10))
        .await;
    assert!(done.error.unwrap().contains("timed out"));

    // The stub wrote its pid before sleeping; by the time the failure is
    // recorded the invoker has killed and reaped it.
    let pid_file = harness.dir().join("encoder.pid");
    let pid = std::fs::read_to_string(&pid_file)
        .expect("encoder stub never started")
        .trim()
        .to_string();
    let alive = std::process::Command::new("sh")
        .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "encoder process {pid} survived the timeout");
}

// ---------------------------------------------------------------------------
// Cancellation of an in-flight job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_kills_in_flight_conversion() {
    let harness = TestHarness::build(Config::default(), FakeEncoder::Hang, 1);

    let job = harness.submit("track.mp3", b"data").await;
    harness
        .wait_for_status(job.id, JobStatus::InProgress, DEADLINE)
        .await;

    assert!(harness.ctx.cancels.cancel(job.id));

    let done = harness.wait_for_terminal(job.id, DEADLINE).await;
    assert_eq!(done.status, JobStatus::Cancelled);
    assert!(done.finished_at.is_some());
}

// ---------------------------------------------------------------------------
// Out-of-order completion across workers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multiple_workers_finish_independently() {
    let harness = TestHarness::with_workers(2);

    let a = harness.submit("a.mp3", b"first").await;
    let b = harness.submit("b.mp3", b"second").await;

    let a = harness.wait_for_terminal(a.id, DEADLINE).await;
    let b = harness.wait_for_terminal(b.id, DEADLINE).await;
    assert_eq!(a.status, JobStatus::Succeeded);
    assert_eq!(b.status, JobStatus::Succeeded);

    let stats = harness.ctx.registry.stats();
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.total_finished, 2);
}

// ---------------------------------------------------------------------------
// Restart reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_reconciles_interrupted_jobs() {
    let tmp = tempfile::TempDir::new().unwrap();
    let state = tmp.path().join("state.json");

    let in_flight_id;
    let queued_id;
    let finished_id;
    {
        let registry = JobRegistry::new(Some(state.clone()));

        let mut job = Job::new("running.mp3", 10, EncodeParams::default());
        in_flight_id = job.id;
        registry.create(job.clone());
        registry.start(job.id).unwrap();

        job = Job::new("waiting.mp3", 10, EncodeParams::default());
        queued_id = job.id;
        registry.create(job);

        job = Job::new("done.mp3", 10, EncodeParams::default());
        finished_id = job.id;
        registry.create(job.clone());
        registry.start(job.id).unwrap();
        registry.succeed(job.id, "done.aac").unwrap();
    }

    // A fresh registry over the same state file, as on process restart.
    let registry = JobRegistry::new(Some(state));
    assert_eq!(registry.mark_lost(), 2);

    let lost = registry.get(in_flight_id).unwrap();
    assert_eq!(lost.status, JobStatus::Failed);
    assert_eq!(lost.error.as_deref(), Some(WORKER_LOST));

    let dropped = registry.get(queued_id).unwrap();
    assert_eq!(dropped.status, JobStatus::Cancelled);

    // Terminal history is untouched.
    let done = registry.get(finished_id).unwrap();
    assert_eq!(done.status, JobStatus::Succeeded);
    assert_eq!(done.result.as_deref(), Some("done.aac"));
}
