use super::*;

#[tokio::test]
async fn test_complete_delivers_outcome_once() {
    let (mut handle, control) = WorkerHandle::pair(None);
    control.start();
    assert_eq!(handle.state(), WorkerState::Started);

    control.complete(WorkerOutcome::Succeeded);
    assert_eq!(handle.state(), WorkerState::Succeeded);

    let completion = handle.take_completion().unwrap();
    assert!(handle.take_completion().is_none());
    assert!(matches!(completion.outcome().await, WorkerOutcome::Succeeded));
}

#[tokio::test]
async fn test_cancel_is_idempotent_and_keeps_first_reason() {
    let (handle, control) = WorkerHandle::pair(Some(42));
    control.start();
    assert_eq!(handle.pid(), Some(42));

    handle.cancel("timeout");
    handle.cancel("shutdown");
    assert!(handle.is_cancel_requested());
    assert_eq!(control.cancelled().await, "timeout");
    assert_eq!(control.cancel_reason().as_deref(), Some("timeout"));
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let (handle, control) = WorkerHandle::pair(None);
    control.start();
    let shared = control.shared.clone();
    control.complete(WorkerOutcome::Succeeded);

    handle.cancel("late");
    handle.kill();
    assert!(!handle.is_cancel_requested());
    assert!(!shared.kill.is_cancelled());
    assert_eq!(handle.state(), WorkerState::Succeeded);
}

#[tokio::test]
async fn test_kill_wakes_control() {
    let (handle, control) = WorkerHandle::pair(None);
    control.start();
    handle.kill();
    assert!(control.is_kill_requested());
    control.killed().await;
    control.complete(WorkerOutcome::Killed);
    assert_eq!(handle.state(), WorkerState::Killed);
}

#[tokio::test]
async fn test_dropped_control_resolves_to_crash() {
    let (mut handle, control) = WorkerHandle::pair(None);
    control.start();
    drop(control);

    assert_eq!(handle.state(), WorkerState::Failed);
    let outcome = handle.take_completion().unwrap().outcome().await;
    let WorkerOutcome::Failed(detail) = outcome else {
        panic!("expected a crash, got {:?}", outcome);
    };
    assert_eq!(detail.name, "WorkerCrashError");
}

#[test]
fn test_outcome_states() {
    assert_eq!(WorkerOutcome::Succeeded.state(), WorkerState::Succeeded);
    assert_eq!(
        WorkerOutcome::Cancelled { reason: "shutdown".into() }.state(),
        WorkerState::Cancelled
    );
    assert_eq!(WorkerOutcome::Killed.state(), WorkerState::Killed);
    assert!(!WorkerState::Started.is_terminal());
    assert!(WorkerState::Failed.is_terminal());
}

#[test]
fn test_worker_ids_are_unique() {
    let (a, _ca) = WorkerHandle::pair(None);
    let (b, _cb) = WorkerHandle::pair(None);
    assert_ne!(a.id(), b.id());
}
