//! Isolated workers that run one job occurrence each.
//!
//! A launcher returns a [`WorkerHandle`] to the supervisor and keeps the
//! matching [`WorkerControl`] on its side of the isolation boundary:
//!
//! - the handle can request cooperative cancellation or a hard kill and
//!   yields the outcome exactly once;
//! - the control observes those requests and delivers the outcome. It is
//!   consumed by [`WorkerControl::complete`], so a second report cannot be
//!   expressed. Dropping it without completing surfaces as a crash.

mod process;
mod protocol;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::descriptor::JobDescriptor;
use crate::error::WorkerError;

pub use process::ProcessLauncher;
pub use protocol::{
    decode_report, encode_report, report_failure, report_success, run_job, ErrorDetail,
    WorkerReport, JOB_NAME_ENV, RESULT_FRAME_PREFIX,
};

/// Unique id of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    Started,
    Succeeded,
    Failed,
    Cancelled,
    Killed,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Succeeded | WorkerState::Failed | WorkerState::Cancelled | WorkerState::Killed
        )
    }
}

/// Final result of an invocation.
#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// The job reported success.
    Succeeded,
    /// The job reported failure, or died without reporting.
    Failed(ErrorDetail),
    /// The job stopped after a cooperative cancellation request.
    Cancelled { reason: String },
    /// The job was forcibly terminated.
    Killed,
}

impl WorkerOutcome {
    /// Terminal state this outcome leads to.
    pub fn state(&self) -> WorkerState {
        match self {
            WorkerOutcome::Succeeded => WorkerState::Succeeded,
            WorkerOutcome::Failed(_) => WorkerState::Failed,
            WorkerOutcome::Cancelled { .. } => WorkerState::Cancelled,
            WorkerOutcome::Killed => WorkerState::Killed,
        }
    }
}

/// Something that can start a worker for a job occurrence.
pub trait WorkerLauncher: Send + Sync {
    /// Start one occurrence of `job`.
    fn launch(&self, job: &JobDescriptor) -> Result<WorkerHandle, WorkerError>;
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    cancel: CancellationToken,
    kill: CancellationToken,
    cancel_reason: Mutex<Option<String>>,
}

/// Supervisor-side handle of a running worker.
pub struct WorkerHandle {
    id: WorkerId,
    pid: Option<u32>,
    shared: Arc<WorkerShared>,
    completion: Option<WorkerCompletion>,
}

impl WorkerHandle {
    /// Create a handle and the control for the launcher side.
    pub fn pair(pid: Option<u32>) -> (WorkerHandle, WorkerControl) {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState::Created),
            cancel: CancellationToken::new(),
            kill: CancellationToken::new(),
            cancel_reason: Mutex::new(None),
        });
        let (sender, receiver) = oneshot::channel();
        let id = WorkerId::new();

        let handle = WorkerHandle {
            id,
            pid,
            shared: shared.clone(),
            completion: Some(WorkerCompletion { receiver }),
        };
        let control = WorkerControl {
            id,
            shared,
            sender: Some(sender),
        };
        (handle, control)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// OS process id, when the worker is a process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Request cooperative termination.
    ///
    /// Safe to call repeatedly and after completion; only the first reason
    /// is kept.
    pub fn cancel(&self, reason: &str) {
        if self.state().is_terminal() {
            return;
        }
        {
            let mut stored = self.shared.cancel_reason.lock();
            if stored.is_none() {
                *stored = Some(reason.to_string());
            }
        }
        if !self.shared.cancel.is_cancelled() {
            debug!(worker = %self.id, reason, "Cancelling worker");
            self.shared.cancel.cancel();
        }
    }

    /// Request forced termination. No-op after completion.
    pub fn kill(&self) {
        if self.state().is_terminal() {
            return;
        }
        if !self.shared.kill.is_cancelled() {
            debug!(worker = %self.id, "Killing worker");
            self.shared.kill.cancel();
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Take the completion future. Returns `None` after the first call.
    pub fn take_completion(&mut self) -> Option<WorkerCompletion> {
        self.completion.take()
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolves to the worker's outcome.
pub struct WorkerCompletion {
    receiver: oneshot::Receiver<WorkerOutcome>,
}

impl WorkerCompletion {
    /// Wait for the outcome.
    ///
    /// A worker whose control is dropped without reporting resolves to a
    /// crash.
    pub async fn outcome(self) -> WorkerOutcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => WorkerOutcome::Failed(ErrorDetail::crashed(
                "worker exited without reporting a result",
            )),
        }
    }
}

/// Launcher-side control of a worker.
pub struct WorkerControl {
    id: WorkerId,
    shared: Arc<WorkerShared>,
    sender: Option<oneshot::Sender<WorkerOutcome>>,
}

impl WorkerControl {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Mark the worker as started.
    pub fn start(&self) {
        let mut state = self.shared.state.lock();
        if *state == WorkerState::Created {
            *state = WorkerState::Started;
        }
    }

    /// Resolves with the reason once cancellation is requested.
    pub async fn cancelled(&self) -> String {
        self.shared.cancel.cancelled().await;
        self.cancel_reason()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    /// Resolves once a kill is requested.
    pub async fn killed(&self) {
        self.shared.kill.cancelled().await;
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn is_kill_requested(&self) -> bool {
        self.shared.kill.is_cancelled()
    }

    /// Reason given with the first cancellation request.
    pub fn cancel_reason(&self) -> Option<String> {
        self.shared.cancel_reason.lock().clone()
    }

    /// Deliver the outcome. Consumes the control.
    pub fn complete(mut self, outcome: WorkerOutcome) {
        *self.shared.state.lock() = outcome.state();
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for WorkerControl {
    fn drop(&mut self) {
        if self.sender.is_some() {
            let mut state = self.shared.state.lock();
            if !state.is_terminal() {
                *state = WorkerState::Failed;
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
