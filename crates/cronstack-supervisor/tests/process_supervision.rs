//! End-to-end supervision of real child processes.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use cronstack_supervisor::{
    DrainReport, Entrypoint, JobDescriptor, JobEvent, ProcessLauncher, RunMode, Supervisor,
    SupervisorConfig, SupervisorHandle,
};
use tokio::sync::broadcast;

const YEARLY: &str = "0 0 0 1 1 *";

fn start(config: SupervisorConfig) -> SupervisorHandle {
    Supervisor::new(config, Arc::new(ProcessLauncher::new()))
        .start()
        .unwrap()
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<JobEvent>, mut pred: F) -> JobEvent
where
    F: FnMut(&JobEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not observed")
}

#[tokio::test]
async fn once_now_runs_reporting_job_and_finishes() {
    let supervisor = start(SupervisorConfig::default().with_mode(RunMode::OnceNow));
    let mut events = supervisor.subscribe();

    supervisor
        .register(vec![JobDescriptor::new(
            "report",
            YEARLY,
            Entrypoint::shell(r#"printf '::cronstack-result::{"status":"success"}\n'"#),
        )])
        .await
        .unwrap();

    let mut seen = Vec::new();
    loop {
        let event = next_matching(&mut events, |_| true).await;
        let done = matches!(event, JobEvent::Retired { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    assert!(matches!(seen[0], JobEvent::Dispatched { due: None, .. }));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::Succeeded { .. })));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::Idle { .. })));

    tokio::time::timeout(Duration::from_secs(1), supervisor.wait_finished())
        .await
        .unwrap();
    assert!(supervisor.status().await.is_empty());
}

#[tokio::test]
async fn failure_report_reaches_subscribers() {
    let supervisor = start(SupervisorConfig::default());
    let mut events = supervisor.subscribe();

    supervisor
        .register(vec![JobDescriptor::new(
            "sync",
            YEARLY,
            Entrypoint::shell(
                r#"printf '::cronstack-result::{"status":"failure","error":{"name":"SyncError","message":"remote refused","causes":[]}}\n'"#,
            ),
        )])
        .await
        .unwrap();
    supervisor.run_now("sync").await.unwrap();

    let event = next_matching(&mut events, |e| matches!(e, JobEvent::Failed { .. })).await;
    let JobEvent::Failed { error, .. } = event else {
        unreachable!();
    };
    assert!(error.to_string().contains("remote refused"));

    let status = supervisor.status().await;
    assert_eq!(status[0].stats.failures, 1);
    assert_eq!(supervisor.drain_all(Duration::from_secs(1)).await, DrainReport::default());
}

#[tokio::test]
async fn timeout_kills_process_ignoring_sigterm() {
    let mut config = SupervisorConfig::default();
    config.cancel_grace_ms = 200;
    let supervisor = start(config);
    let mut events = supervisor.subscribe();

    supervisor
        .register(vec![
            JobDescriptor::new("stubborn", YEARLY, Entrypoint::shell("trap '' TERM; sleep 5"))
                .with_timeout_ms(300),
        ])
        .await
        .unwrap();
    supervisor.run_now("stubborn").await.unwrap();

    let failed = next_matching(&mut events, |e| matches!(e, JobEvent::Failed { .. })).await;
    assert!(failed.is_timeout());
    next_matching(&mut events, |e| matches!(e, JobEvent::Killed { .. })).await;
    next_matching(&mut events, |e| matches!(e, JobEvent::Idle { .. })).await;

    let status = supervisor.status().await;
    assert_eq!(status[0].active_workers, 0);
    assert_eq!(status[0].stats.failures, 1);
}

#[tokio::test]
async fn drain_cancels_running_process() {
    let supervisor = start(SupervisorConfig::default());
    let mut events = supervisor.subscribe();

    supervisor
        .register(vec![JobDescriptor::new(
            "sleeper",
            YEARLY,
            Entrypoint::shell("exec sleep 30"),
        )])
        .await
        .unwrap();
    supervisor.run_now("sleeper").await.unwrap();
    next_matching(&mut events, |e| matches!(e, JobEvent::Dispatched { .. })).await;

    let report = supervisor.drain_all(Duration::from_secs(5)).await;
    assert_eq!(
        report,
        DrainReport {
            cancelled: 1,
            killed: 0,
            unconfirmed: 0
        }
    );

    let event = next_matching(&mut events, |e| matches!(e, JobEvent::Cancelled { .. })).await;
    let JobEvent::Cancelled { reason, .. } = event else {
        unreachable!();
    };
    assert_eq!(reason, "shutdown");
}
