//! Checkpoint, resume, and cancellation tests.
//!
//! These tests verify that an interrupted session can be replayed from
//! its last checkpoint to the same final state as an uninterrupted run,
//! and that settled tasks are never re-executed.

use serde_json::json;
use tokio_util::sync::CancellationToken;

use convoy::checkpoint::SessionState;
use convoy::core::task::{TaskId, TaskStatus};

use crate::fixtures::{chain, diamond, ok_executor, RecordingExecutor, TestEnv};

fn id(s: &str) -> TaskId {
    TaskId::from(s)
}

/// Test: Resume idempotence
/// Given the same task set run twice, once uninterrupted and once
/// interrupted after the first wave then resumed
/// Then both end Done with identical per-task checkpoint contents
#[tokio::test]
async fn test_interrupted_then_resumed_matches_uninterrupted_run() {
    // Uninterrupted reference run.
    let reference_env = TestEnv::new();
    let (tasks, edges) = diamond();
    let reference = reference_env.submit(tasks, edges).await;
    reference_env.run(&reference, ok_executor()).await;
    let reference_record = reference_env
        .store()
        .load(&reference.to_string())
        .await
        .unwrap();
    assert_eq!(reference_record.state, SessionState::Done);

    // Interrupted run: cancellation fires during the first wave, so the
    // in-flight tasks drain and checkpoint, then the session stops.
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let interrupted = RecordingExecutor::with_outcome(move |task, _| {
        trigger.cancel();
        Ok(json!(task.id.as_str()))
    });
    let (summary, _) = env.run_with_cancel(&session, interrupted, cancel).await;

    assert_eq!(summary.state, SessionState::Failed);
    let partial = env.store().load(&session.to_string()).await.unwrap();
    assert!(partial.completed_count() < 3);
    assert!(partial.completed_count() > 0);

    // Replay from the checkpoint with a fresh executor.
    let resumed = ok_executor();
    let (summary, _) = env.resume(&session, resumed.clone()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);

    // The settled prefix was not re-executed.
    for task in partial.completed_ids() {
        assert_eq!(resumed.attempts_for(&task), 0);
    }

    // Same terminal contents as the uninterrupted run.
    let final_record = env.store().load(&session.to_string()).await.unwrap();
    assert_eq!(final_record.state, reference_record.state);
    assert_eq!(final_record.tasks, reference_record.tasks);
}

/// Test: Resuming a finished session is a no-op
/// Given a session already at Done
/// When it is resumed
/// Then no task is executed and no wave is planned
#[tokio::test]
async fn test_resume_after_done_executes_nothing() {
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    env.run(&session, ok_executor()).await;

    let executor = ok_executor();
    let (summary, _) = env.resume(&session, executor.clone()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.waves, 0);
    assert!(executor.calls().is_empty());
}

/// Test: Partial progress seeded out-of-band
/// Given a checkpoint already holding A's result
/// When the session is resumed
/// Then A keeps its prior payload and only B and C execute
#[tokio::test]
async fn test_resume_skips_previously_settled_tasks() {
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    env.store()
        .append_task_result(
            &session.to_string(),
            id("A"),
            TaskStatus::Completed,
            Some(json!("prior")),
            1,
        )
        .await
        .unwrap();

    let executor = ok_executor();
    let (summary, _) = env.resume(&session, executor.clone()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);
    assert_eq!(executor.attempts_for(&id("A")), 0);
    assert_eq!(executor.attempts_for(&id("B")), 1);
    assert_eq!(executor.attempts_for(&id("C")), 1);

    let record = env.store().load(&session.to_string()).await.unwrap();
    assert_eq!(record.tasks.get(&id("A")).unwrap().payload, Some(json!("prior")));
}

/// Test: Cancellation drains the in-flight wave
/// Given the chain a -> b -> c with cancellation during a
/// When the session stops
/// Then a's result is checkpointed, b and c never ran, and the partial
/// progress is visible through the status query
#[tokio::test]
async fn test_cancel_preserves_checkpointed_progress() {
    let env = TestEnv::new();
    let (tasks, edges) = chain();
    let session = env.submit(tasks, edges).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let executor = RecordingExecutor::with_outcome(move |task, _| {
        trigger.cancel();
        Ok(json!(task.id.as_str()))
    });
    let (summary, _) = env.run_with_cancel(&session, executor.clone(), cancel).await;

    assert_eq!(summary.state, SessionState::Failed);
    assert_eq!(executor.calls(), vec![id("a")]);

    let record = env.store().load(&session.to_string()).await.unwrap();
    assert!(record.completed_ids().contains(&id("a")));
    assert!(!record.is_settled(&id("b")));
    assert!(!record.is_settled(&id("c")));

    let status = env.manager.status(&session).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert_eq!(status.completed_count, 1);
    assert_eq!(status.total_count, 3);

    // The cancelled session is still resumable.
    let (summary, _) = env.resume(&session, ok_executor()).await;
    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);
}
