//! End-to-end session execution tests.
//!
//! These tests drive full sessions from submission to a terminal state
//! and verify wave planning, dispatch ordering, and the submission-time
//! validation contract.

use std::collections::HashSet;

use convoy::core::dag::DependencyEdge;
use convoy::core::task::TaskId;
use convoy::checkpoint::SessionState;
use convoy::orchestration::SchedulerOptions;
use convoy::Error;

use crate::fixtures::{
    chain, diamond, independent_tasks, ok_executor, test_options, test_task, waves_of, TestEnv,
};

fn id(s: &str) -> TaskId {
    TaskId::from(s)
}

/// Test: Happy path with independent tasks
/// Given 3 independent tasks and cap 2
/// When the session runs
/// Then it reaches Done with every task executed exactly once
#[tokio::test]
async fn test_three_independent_tasks_complete() {
    let env = TestEnv::new();
    let session = env.submit(independent_tasks(3), vec![]).await;

    let executor = ok_executor();
    let (summary, _) = env.run(&session, executor.clone()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.waves, 2);

    for (task, count) in executor.attempt_counts() {
        assert_eq!(count, 1, "task {} executed more than once", task);
    }
}

/// Test: Documented two-wave scenario
/// Given A, B independent and C depending on both, cap 2
/// When the session runs
/// Then wave 1 is [A, B], wave 2 is [C], final state Done 3/3
#[tokio::test]
async fn test_diamond_runs_as_two_waves() {
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    let (summary, events) = env.run(&session, ok_executor()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.total, 3);

    let waves = waves_of(&events);
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[0], vec![id("A"), id("B")]);
    assert_eq!(waves[1], vec![id("C")]);
}

/// Test: Wave size property
/// Given 7 independent tasks and cap 3
/// When the session runs
/// Then no planned wave exceeds the cap and every task appears in
/// exactly one wave
#[tokio::test]
async fn test_waves_never_exceed_cap_and_cover_each_task_once() {
    let env = TestEnv::new();
    let session = env
        .manager
        .submit(
            independent_tasks(7),
            vec![],
            SchedulerOptions {
                concurrency: 3,
                ..test_options()
            },
        )
        .await
        .unwrap();

    let (summary, events) = env.run(&session, ok_executor()).await;

    assert_eq!(summary.state, SessionState::Done);

    let waves = waves_of(&events);
    let mut seen = HashSet::new();
    for wave in &waves {
        assert!(wave.len() <= 3, "wave larger than cap: {:?}", wave);
        for task in wave {
            assert!(seen.insert(task.clone()), "task {} planned twice", task);
        }
    }
    assert_eq!(seen.len(), 7);
}

/// Test: Dispatch ordering within a wave
/// Given tasks with mixed priorities
/// When the first wave is planned
/// Then it holds the highest-priority tasks, ties broken by identifier
#[tokio::test]
async fn test_priority_orders_dispatch() {
    let env = TestEnv::new();
    let tasks = vec![
        test_task("zeta").with_priority(10),
        test_task("alpha"),
        test_task("beta").with_priority(10),
    ];
    let session = env.submit(tasks, vec![]).await;

    let (_, events) = env.run(&session, ok_executor()).await;

    let waves = waves_of(&events);
    assert_eq!(waves[0], vec![id("beta"), id("zeta")]);
    assert_eq!(waves[1], vec![id("alpha")]);
}

/// Test: Causal order across waves
/// Given the chain a -> b -> c
/// When the session runs
/// Then execution order matches the chain, one wave per task
#[tokio::test]
async fn test_chain_executes_in_dependency_order() {
    let env = TestEnv::new();
    let (tasks, edges) = chain();
    let session = env.submit(tasks, edges).await;

    let executor = ok_executor();
    let (summary, _) = env.run(&session, executor.clone()).await;

    assert_eq!(summary.state, SessionState::Done);
    assert_eq!(summary.waves, 3);
    assert_eq!(executor.calls(), vec![id("a"), id("b"), id("c")]);
}

/// Test: Result payloads are checkpointed
/// Given a session that completes
/// Then each task's payload is readable from the checkpoint
#[tokio::test]
async fn test_payloads_survive_in_checkpoint() {
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    env.run(&session, ok_executor()).await;

    let record = env.store().load(&session.to_string()).await.unwrap();
    assert_eq!(record.state, SessionState::Done);
    for name in ["A", "B", "C"] {
        let result = record.tasks.get(&id(name)).unwrap();
        assert_eq!(result.payload, Some(serde_json::json!(name)));
        assert_eq!(result.attempts, 1);
    }
}

/// Test: Cycle rejection
/// Given X depending on Y and Y depending on X
/// When the session is submitted
/// Then submission fails with a cycle naming both tasks and nothing is
/// registered or scheduled
#[tokio::test]
async fn test_cycle_rejected_at_submission() {
    let env = TestEnv::new();
    let tasks = vec![test_task("X"), test_task("Y")];
    let edges = vec![DependencyEdge::new("X", "Y"), DependencyEdge::new("Y", "X")];

    let result = env.manager.submit(tasks, edges, test_options()).await;

    match result.unwrap_err() {
        Error::CyclicDependency { cycle } => {
            assert!(cycle.contains(&id("X")));
            assert!(cycle.contains(&id("Y")));
        }
        other => panic!("Expected CyclicDependency, got {:?}", other),
    }

    assert!(env.manager.sessions().await.unwrap().is_empty());
}

/// Test: Duplicate identifier rejection
/// Given two tasks sharing an identifier
/// When the session is submitted
/// Then submission fails with DuplicateTask
#[tokio::test]
async fn test_duplicate_task_rejected_at_submission() {
    let env = TestEnv::new();
    let tasks = vec![test_task("same"), test_task("same")];

    let result = env.manager.submit(tasks, vec![], test_options()).await;

    assert!(matches!(result.unwrap_err(), Error::DuplicateTask(d) if d == id("same")));
}

/// Test: Unknown endpoint rejection
/// Given an edge referencing an unregistered task
/// When the session is submitted
/// Then submission fails with UnknownTask
#[tokio::test]
async fn test_unknown_edge_endpoint_rejected_at_submission() {
    let env = TestEnv::new();
    let tasks = vec![test_task("real")];
    let edges = vec![DependencyEdge::new("real", "phantom")];

    let result = env.manager.submit(tasks, edges, test_options()).await;

    assert!(matches!(result.unwrap_err(), Error::UnknownTask(u) if u == id("phantom")));
}

/// Test: Status query after completion
/// Given a finished session
/// When status is queried
/// Then it reports Done with full counts and no failed tasks
#[tokio::test]
async fn test_status_reflects_done_session() {
    let env = TestEnv::new();
    let (tasks, edges) = diamond();
    let session = env.submit(tasks, edges).await;

    env.run(&session, ok_executor()).await;

    let status = env.manager.status(&session).await.unwrap();
    assert_eq!(status.session_id, session);
    assert_eq!(status.state, SessionState::Done);
    assert_eq!(status.completed_count, 3);
    assert_eq!(status.total_count, 3);
    assert!(status.failed_tasks.is_empty());
}
