//! End-to-end chunked upload flows driven through `StepDriver`
//!
//! The upload is modelled the way a storage service expects it:
//! create an upload session, send the parts in parallel, then commit.
//! These tests check that one `cancel()` on the caller's handle stops the
//! upload wherever it is, and that it never reaches back into steps that
//! already finished.

mod common;

use common::{CountingOperation, MockUploadService, RequestOutcome, drain_events, wait_for_event};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use transfer_task::{
    Cancellable, CompositeTask, DriverConfig, Event, NetworkTask, Registration, Result,
    StepContext, StepDriver, TaskState,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

fn driver() -> StepDriver {
    StepDriver::new(DriverConfig::default()).unwrap()
}

/// Create session -> upload parts in parallel -> commit
async fn run_upload(ctx: StepContext, service: MockUploadService, parts: usize) -> Result<String> {
    let session = {
        let service = service.clone();
        ctx.step("create-session", move |token| async move {
            service.send("create-session", token).await
        })
        .await?
    };

    let part_requests = (0..parts).map(|n| {
        let service = service.clone();
        move |token: CancellationToken| async move {
            let endpoint = format!("upload-part/{n}");
            service.send(&endpoint, token).await
        }
    });
    ctx.parallel("upload-parts", part_requests).await?;

    ctx.checkpoint()?;
    ctx.step("commit", move |token| async move {
        service.send("commit", token).await
    })
    .await?;

    Ok(session)
}

/// Poll the mock service until `count` requests to `prefix` have been sent
async fn wait_for_requests(service: &MockUploadService, prefix: &str, count: usize) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while service.requests_to(prefix).len() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_full_upload_sends_every_request() {
    let driver = driver();
    let mut events = driver.subscribe();
    let service = MockUploadService::new(Duration::from_millis(5));

    let handle = {
        let service = service.clone();
        driver.spawn("upload report.pdf", move |ctx| run_upload(ctx, service, 3))
    };
    let task = handle.task().clone();

    assert_eq!(handle.join().await.unwrap(), "ok:create-session");

    let requests = service.requests();
    assert_eq!(requests.len(), 5);
    assert!(
        requests
            .iter()
            .all(|r| r.outcome == RequestOutcome::Succeeded)
    );
    assert_eq!(requests.last().unwrap().endpoint, "commit");
    assert_eq!(task.state(), TaskState::Completed);

    let completed = drain_events(&mut events)
        .into_iter()
        .find(|e| matches!(e, Event::OperationCompleted { .. }));
    assert!(matches!(
        completed,
        Some(Event::OperationCompleted { steps: 3, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_parts_stops_upload() {
    let driver = driver();
    let service = MockUploadService::new(Duration::from_secs(30));
    let fast_session = MockUploadService::new(Duration::from_millis(1));

    let handle = {
        let service = service.clone();
        let fast_session = fast_session.clone();
        driver.spawn("upload video.mp4", move |ctx| async move {
            let session = ctx
                .step("create-session", move |token| async move {
                    fast_session.send("create-session", token).await
                })
                .await?;
            let parts = (0..4).map(|n| {
                let service = service.clone();
                move |token: CancellationToken| async move {
                    let endpoint = format!("upload-part/{n}");
                    service.send(&endpoint, token).await
                }
            });
            ctx.parallel("upload-parts", parts).await?;
            ctx.step("commit", move |token| async move {
                service.send("commit", token).await
            })
            .await?;
            Ok(session)
        })
    };
    let task = handle.task().clone();

    wait_for_requests(&service, "upload-part/", 4).await;
    handle.cancel();

    let err = handle.join().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(task.is_cancelled());

    let parts = service.requests_to("upload-part/");
    assert!(parts.iter().all(|r| r.was_cancelled()));
    assert!(parts.iter().all(|r| r.outcome != RequestOutcome::Succeeded));
    assert!(
        service.requests_to("commit").is_empty(),
        "commit must never be sent after cancel"
    );

    // The session request finished before cancel and is left alone
    let session = fast_session.requests();
    assert_eq!(session[0].outcome, RequestOutcome::Succeeded);
    assert!(!session[0].was_cancelled());
}

#[tokio::test]
async fn test_cancel_before_first_step_sends_nothing() {
    let driver = driver();
    let service = MockUploadService::new(Duration::from_millis(1));
    let task = CompositeTask::new();

    task.cancel();
    let err = run_upload(driver.context(task.clone()), service.clone(), 2)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(service.requests().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_commit_reports_step() {
    let driver = driver();
    let mut events = driver.subscribe();
    let slow = MockUploadService::new(Duration::from_secs(30));
    let fast = MockUploadService::new(Duration::from_millis(1));

    let handle = {
        let slow = slow.clone();
        driver.spawn("upload notes.txt", move |ctx| async move {
            ctx.step("create-session", move |token| async move {
                fast.send("create-session", token).await
            })
            .await?;
            ctx.step("commit", move |token| async move {
                slow.send("commit", token).await
            })
            .await
        })
    };

    wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::StepStarted { step, .. } if step == "commit")
    })
    .await
    .unwrap();
    wait_for_requests(&slow, "commit", 1).await;
    handle.cancel();

    let cancelled = wait_for_event(&mut events, EVENT_TIMEOUT, |e| {
        matches!(e, Event::Cancelled { .. })
    })
    .await
    .unwrap();
    assert!(matches!(cancelled, Event::Cancelled { step: Some(ref s), .. } if s == "commit"));
    assert!(handle.join().await.unwrap_err().is_cancelled());
    assert!(slow.requests()[0].was_cancelled());
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let driver = driver();
    let mut events = driver.subscribe();
    let service = MockUploadService::new(Duration::from_millis(1));

    let handle = {
        let service = service.clone();
        driver.spawn("upload small.bin", move |ctx| run_upload(ctx, service, 1))
    };
    let task = handle.task().clone();
    handle.join().await.unwrap();

    task.cancel();
    task.cancel();

    assert_eq!(task.state(), TaskState::Completed);
    assert!(!task.is_cancelled());
    assert!(service.requests().iter().all(|r| !r.was_cancelled()));
    assert!(
        !drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, Event::Cancelled { .. }))
    );
}

#[test]
fn test_finished_step_untouched_and_running_step_cancelled() {
    let upload = CompositeTask::new();

    let op_a = CountingOperation::default();
    let task_a = NetworkTask::with_operation(op_a.clone());
    assert_eq!(upload.register_nested(task_a.clone()), Registration::Stored);
    task_a.complete();

    let op_b = CountingOperation::default();
    let task_b = NetworkTask::with_operation(op_b.clone());
    assert_eq!(upload.register_nested(task_b.clone()), Registration::Stored);

    upload.cancel();

    assert!(!task_a.is_cancelled());
    assert_eq!(op_a.cancel_count(), 0);
    assert!(task_b.is_cancelled());
    assert_eq!(op_b.cancel_count(), 1);
}
