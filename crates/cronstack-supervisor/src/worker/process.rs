//! Process-backed workers.
//!
//! Each occurrence runs as a child process. The child's stdout is always
//! piped so result lines can be picked out; everything else is relayed to
//! the log when the job inherits stdio.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::protocol::{decode_report, ErrorDetail, WorkerReport, JOB_NAME_ENV};
use super::{WorkerControl, WorkerHandle, WorkerLauncher, WorkerOutcome};
use crate::descriptor::{JobDescriptor, ResultProtocol, StdioMode};
use crate::error::WorkerError;

/// How long to keep reading stdout after the child exited.
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Default time a child may linger after reporting its result.
const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(5);

/// Launches each job occurrence as a child process.
///
/// On unix every child leads its own process group, and signals go to the
/// whole group, so a shell command's children stop with it.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    default_cwd: Option<PathBuf>,
    exit_grace: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            default_cwd: None,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working directory for entrypoints that don't set one.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(cwd.into());
        self
    }

    /// How long a child may keep running after reporting its result before
    /// it is killed. Usually the supervisor's cancel grace.
    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, job: &JobDescriptor) -> Result<WorkerHandle, WorkerError> {
        let entrypoint = &job.entrypoint;

        let mut cmd = Command::new(&entrypoint.program);
        cmd.args(&entrypoint.args)
            .envs(&entrypoint.env)
            .env(JOB_NAME_ENV, &job.name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(match entrypoint.stdio {
                StdioMode::Inherit => Stdio::inherit(),
                StdioMode::Ignore => Stdio::null(),
            })
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        if let Some(cwd) = entrypoint.cwd.as_ref().or(self.default_cwd.as_ref()) {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            program: entrypoint.program.clone(),
            source,
        })?;
        let stdout = child.stdout.take();

        let (handle, control) = WorkerHandle::pair(child.id());
        control.start();
        debug!(job = %job.name, worker = %handle.id(), pid = ?handle.pid(), "Worker process started");

        let monitor = ChildMonitor {
            job: job.name.clone(),
            stdio: entrypoint.stdio,
            protocol: entrypoint.protocol,
            exit_grace: self.exit_grace,
        };
        tokio::spawn(monitor.run(child, stdout, control));

        Ok(handle)
    }
}

enum Step {
    Exited(std::io::Result<ExitStatus>),
    Line(std::io::Result<Option<String>>),
    Terminate(String),
    Kill,
    Linger,
}

struct ChildMonitor {
    job: String,
    stdio: StdioMode,
    protocol: ResultProtocol,
    exit_grace: Duration,
}

impl ChildMonitor {
    async fn run(self, mut child: Child, stdout: Option<ChildStdout>, control: WorkerControl) {
        // Also the process group id; gone from the child once it is reaped.
        let pid = child.id();
        let mut lines = stdout.map(|s| BufReader::new(s).lines());
        let mut stdout_open = lines.is_some();
        let mut report: Option<WorkerReport> = None;
        let mut cancel_reason: Option<String> = None;
        let mut killed = false;
        let mut linger_deadline: Option<Instant> = None;

        let status = loop {
            let step = tokio::select! {
                status = child.wait() => Step::Exited(status),
                line = next_line(&mut lines), if stdout_open => Step::Line(line),
                reason = control.cancelled(), if cancel_reason.is_none() => Step::Terminate(reason),
                _ = control.killed(), if !killed => Step::Kill,
                _ = sleep_until_deadline(linger_deadline), if linger_deadline.is_some() && !killed => Step::Linger,
            };

            match step {
                Step::Exited(status) => break status,
                Step::Line(Ok(Some(line))) => {
                    if self.handle_line(&line, &mut report) {
                        // The result is in; the process has nothing left to do.
                        terminate(&mut child, pid);
                        linger_deadline = Some(Instant::now() + self.exit_grace);
                    }
                }
                Step::Line(_) => stdout_open = false,
                Step::Terminate(reason) => {
                    debug!(job = %self.job, reason = %reason, "Sending termination signal");
                    terminate(&mut child, pid);
                    cancel_reason = Some(reason);
                }
                Step::Kill => {
                    debug!(job = %self.job, "Killing worker process");
                    kill(&mut child, pid);
                    killed = true;
                }
                Step::Linger => {
                    warn!(job = %self.job, "Worker reported its result but did not exit, killing it");
                    kill(&mut child, pid);
                    killed = true;
                }
            }
        };

        // Whatever the child left behind in its group goes with it once we
        // asked it to stop.
        if killed || cancel_reason.is_some() || report.is_some() {
            kill_group(pid);
        }

        // Pick up a result line written just before exit.
        if stdout_open {
            let drain = async {
                while let Ok(Some(line)) = next_line(&mut lines).await {
                    self.handle_line(&line, &mut report);
                }
            };
            if tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, drain).await.is_err() {
                debug!(job = %self.job, "Stdout still open after exit, giving up");
            }
        }

        let outcome = match report {
            Some(WorkerReport::Success) => WorkerOutcome::Succeeded,
            Some(WorkerReport::Failure { error }) => WorkerOutcome::Failed(error),
            None if killed => WorkerOutcome::Killed,
            None => match (cancel_reason, status) {
                (Some(reason), _) => WorkerOutcome::Cancelled { reason },
                (None, Ok(status)) if status.success() && self.protocol == ResultProtocol::ExitCode => {
                    WorkerOutcome::Succeeded
                }
                (None, Ok(status)) => WorkerOutcome::Failed(ErrorDetail::crashed(describe_exit(status))),
                (None, Err(e)) => WorkerOutcome::Failed(ErrorDetail::crashed(format!(
                    "failed to wait for process: {}",
                    e
                ))),
            },
        };

        control.complete(outcome);
    }

    /// Returns true when the line carried the first result report.
    fn handle_line(&self, line: &str, report: &mut Option<WorkerReport>) -> bool {
        match decode_report(line) {
            Some(Ok(decoded)) => {
                if report.is_some() {
                    warn!(job = %self.job, "Ignoring extra result report");
                    return false;
                }
                *report = Some(decoded);
                true
            }
            Some(Err(e)) => {
                warn!(job = %self.job, error = %e, "Malformed result report");
                false
            }
            None => {
                if self.stdio == StdioMode::Inherit {
                    info!(target: "cronstack::job", job = %self.job, "{}", line);
                }
                false
            }
        }
    }
}

async fn next_line(
    lines: &mut Option<Lines<BufReader<ChildStdout>>>,
) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Ask the child's process group to stop: SIGTERM on unix, a hard kill
/// elsewhere.
fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
        return;
    }
    #[cfg(not(unix))]
    let _ = pid;
    let _ = child.start_kill();
}

/// Kill the child's process group, falling back to the child alone.
fn kill(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    let _ = child.start_kill();
}

fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
    #[cfg(not(unix))]
    let _ = pid;
}

#[cfg(unix)]
fn signal_group(pid: Option<u32>, signal: nix::sys::signal::Signal) -> bool {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match pid {
        Some(pid) => killpg(Pid::from_raw(pid as i32), signal).is_ok(),
        None => false,
    }
}

fn describe_exit(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    "exited abnormally".to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::descriptor::Entrypoint;

    fn job(name: &str, script: &str) -> JobDescriptor {
        JobDescriptor::new(name, "* * * * * *", Entrypoint::shell(script).stdio(StdioMode::Ignore))
    }

    async fn run(desc: &JobDescriptor) -> WorkerOutcome {
        let mut handle = ProcessLauncher::new().launch(desc).unwrap();
        handle.take_completion().unwrap().outcome().await
    }

    #[tokio::test]
    async fn test_success_report() {
        let desc = job("ok", r#"echo working; printf '::cronstack-result::{"status":"success"}\n'"#);
        assert!(matches!(run(&desc).await, WorkerOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_failure_report_carries_error() {
        let desc = job(
            "fail",
            r#"printf '::cronstack-result::{"status":"failure","error":{"name":"SyncError","message":"upstream down","causes":["timeout"]}}\n'"#,
        );
        let WorkerOutcome::Failed(detail) = run(&desc).await else {
            panic!("expected failure");
        };
        assert_eq!(detail.name, "SyncError");
        assert_eq!(detail.message, "upstream down");
        assert_eq!(detail.causes, vec!["timeout".to_string()]);
    }

    #[tokio::test]
    async fn test_exit_without_report_is_a_crash() {
        let desc = job("silent", "exit 0");
        let WorkerOutcome::Failed(detail) = run(&desc).await else {
            panic!("expected crash");
        };
        assert_eq!(detail.name, "WorkerCrashError");
        assert!(detail.causes[0].contains("code 0"));
    }

    #[tokio::test]
    async fn test_exit_code_protocol() {
        let mut ok = job("ok", "exit 0");
        ok.entrypoint.protocol = ResultProtocol::ExitCode;
        assert!(matches!(run(&ok).await, WorkerOutcome::Succeeded));

        let mut bad = job("bad", "exit 3");
        bad.entrypoint.protocol = ResultProtocol::ExitCode;
        let WorkerOutcome::Failed(detail) = run(&bad).await else {
            panic!("expected failure");
        };
        assert!(detail.causes[0].contains("code 3"));
    }

    #[tokio::test]
    async fn test_job_name_is_exported() {
        let desc = job(
            "named-job",
            r#"test "$CRONSTACK_JOB_NAME" = named-job && printf '::cronstack-result::{"status":"success"}\n'"#,
        );
        assert!(matches!(run(&desc).await, WorkerOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let desc = job("slow", "exec sleep 10");
        let mut handle = ProcessLauncher::new().launch(&desc).unwrap();
        let completion = handle.take_completion().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel("timeout");

        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.outcome())
            .await
            .unwrap();
        match outcome {
            WorkerOutcome::Cancelled { reason } => assert_eq!(reason, "timeout"),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_kill_stops_process_ignoring_term() {
        let desc = job("stubborn", "trap '' TERM; while true; do sleep 0.1; done");
        let mut handle = ProcessLauncher::new().launch(&desc).unwrap();
        let completion = handle.take_completion().unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.cancel("shutdown");
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.kill();

        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.outcome())
            .await
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Killed));
    }

    fn pid_file() -> PathBuf {
        std::env::temp_dir().join(format!("cronstack-test-{}.pid", uuid::Uuid::new_v4()))
    }

    async fn read_pid(path: &std::path::Path) -> i32 {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(pid) = std::fs::read_to_string(path).unwrap_or_default().trim().parse() {
                    return pid;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("grandchild pid not written")
    }

    fn is_running(pid: i32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if kill(Pid::from_raw(pid), None).is_err() {
            return false;
        }
        // A zombie waiting to be reaped is not running.
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => !stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| rest.trim_start().starts_with('Z')),
            Err(_) => cfg!(not(target_os = "linux")),
        }
    }

    async fn assert_stopped(pid: i32) {
        let gone = tokio::time::timeout(Duration::from_secs(3), async {
            while is_running(pid) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "process {} outlived its worker", pid);
    }

    #[tokio::test]
    async fn test_cancel_stops_shell_children() {
        let path = pid_file();
        let desc = job("nested", &format!("sleep 30 & echo $! > {}; wait; true", path.display()));
        let mut handle = ProcessLauncher::new().launch(&desc).unwrap();
        let completion = handle.take_completion().unwrap();
        let grandchild = read_pid(&path).await;

        handle.cancel("timeout");
        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.outcome())
            .await
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Cancelled { .. }));
        assert_stopped(grandchild).await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_kill_stops_shell_children() {
        let path = pid_file();
        let desc = job(
            "nested-stubborn",
            &format!("trap '' TERM; sleep 30 & echo $! > {}; wait; true", path.display()),
        );
        let mut handle = ProcessLauncher::new().launch(&desc).unwrap();
        let completion = handle.take_completion().unwrap();
        let grandchild = read_pid(&path).await;

        handle.cancel("shutdown");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(is_running(grandchild));
        handle.kill();

        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.outcome())
            .await
            .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Killed));
        assert_stopped(grandchild).await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_child_lingering_after_report_is_killed() {
        let desc = job(
            "lingering",
            r#"trap '' TERM; printf '::cronstack-result::{"status":"success"}\n'; while true; do sleep 0.1; done"#,
        );
        let launcher = ProcessLauncher::new().with_exit_grace(Duration::from_millis(200));
        let mut handle = launcher.launch(&desc).unwrap();
        let completion = handle.take_completion().unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(5), completion.outcome())
            .await
            .expect("worker never completed");
        assert!(matches!(outcome, WorkerOutcome::Succeeded));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let desc = JobDescriptor::new(
            "missing",
            "* * * * * *",
            Entrypoint::new("/nonexistent/cronstack-job"),
        );
        let err = ProcessLauncher::new().launch(&desc).unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
    }
}
