//! Supervisor - owns the job registry and drives dispatch.
//!
//! All job state lives in a single control loop task. Callers talk to it
//! through a cloneable [`SupervisorHandle`]; ticks, worker completions and
//! timer expiries reach it as internal events. Nothing outside the loop
//! touches a job record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::SupervisorConfig;
use crate::control_loop::ControlLoop;
use crate::descriptor::JobDescriptor;
use crate::error::{RegistrationError, RunNowError, SupervisorError};
use crate::events::JobEvent;
use crate::registry::{prepare_records, JobRecord, JobStatus};
use crate::worker::{WorkerId, WorkerLauncher, WorkerOutcome};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Requests from handles to the control loop.
pub(crate) enum Command {
    Register {
        records: Vec<JobRecord>,
        reply: oneshot::Sender<Result<Vec<String>, RegistrationError>>,
    },
    /// Stop triggers, refuse new dispatches and cancel every worker.
    Freeze {
        reply: oneshot::Sender<(usize, watch::Receiver<usize>)>,
    },
    KillAll {
        reply: oneshot::Sender<usize>,
    },
    /// Replace the whole registry and start it.
    Install {
        records: Vec<JobRecord>,
        reply: oneshot::Sender<Vec<String>>,
    },
    Status {
        reply: oneshot::Sender<Vec<JobStatus>>,
    },
    RunNow {
        job: String,
        reply: oneshot::Sender<Result<WorkerId, RunNowError>>,
    },
}

/// Events raised inside the supervisor.
#[derive(Debug)]
pub(crate) enum Event {
    Tick {
        job: String,
        generation: u64,
        due: DateTime<Utc>,
    },
    WorkerExited {
        job: String,
        worker: WorkerId,
        outcome: WorkerOutcome,
    },
    TimedOut {
        job: String,
        worker: WorkerId,
    },
    /// A timed out worker is still alive after the cancel grace.
    Escalate {
        job: String,
        worker: WorkerId,
    },
}

/// Builds and starts a supervisor.
pub struct Supervisor {
    config: SupervisorConfig,
    launcher: Arc<dyn WorkerLauncher>,
    clock: Arc<dyn Clock>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
        Self {
            config,
            launcher,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use a custom clock for schedule evaluation.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the configuration and spawn the control loop.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Result<SupervisorHandle, SupervisorError> {
        self.config.validate().map_err(SupervisorError::InvalidConfig)?;
        let time_zone = self.config.tz().map_err(SupervisorError::InvalidConfig)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (job_events, _) = broadcast::channel(EVENT_BUFFER);
        let (finished_tx, finished_rx) = watch::channel(false);

        let control = ControlLoop::new(
            self.config.clone(),
            time_zone,
            self.clock.clone(),
            self.launcher,
            event_tx,
            job_events.clone(),
            finished_tx,
        );
        tokio::spawn(control.run(command_rx, event_rx));

        info!(
            time_zone = %time_zone,
            mode = ?self.config.mode,
            "Supervisor started"
        );

        Ok(SupervisorHandle {
            commands: command_tx,
            job_events,
            finished: finished_rx,
            lifecycle: Arc::new(Mutex::new(())),
            time_zone,
            clock: self.clock,
            drain_grace: self.config.drain_grace(),
        })
    }
}

/// Cloneable handle to a running supervisor.
#[derive(Clone)]
pub struct SupervisorHandle {
    pub(crate) commands: mpsc::Sender<Command>,
    job_events: broadcast::Sender<JobEvent>,
    finished: watch::Receiver<bool>,
    /// Serializes register, reload and drain.
    pub(crate) lifecycle: Arc<Mutex<()>>,
    pub(crate) time_zone: Tz,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) drain_grace: Duration,
}

impl SupervisorHandle {
    /// Register a batch of jobs and start their triggers.
    ///
    /// The batch is rejected as a whole on an empty or duplicate name
    /// (within the batch or against live jobs) or an invalid schedule.
    /// Returns the registered names.
    pub async fn register(&self, descriptors: Vec<JobDescriptor>) -> Result<Vec<String>, RegistrationError> {
        let _guard = self.lifecycle.lock().await;
        let records = prepare_records(descriptors, self.time_zone, &self.clock)?;
        let names = self
            .request(|reply| Command::Register { records, reply })
            .await
            .ok_or(RegistrationError::SupervisorStopped)??;
        debug!(jobs = ?names, "Registered jobs");
        Ok(names)
    }

    /// Snapshot of every job, sorted by name.
    pub async fn status(&self) -> Vec<JobStatus> {
        self.request(|reply| Command::Status { reply })
            .await
            .unwrap_or_default()
    }

    /// Dispatch a job immediately, outside its schedule.
    pub async fn run_now(&self, job: &str) -> Result<WorkerId, RunNowError> {
        let job = job.to_string();
        self.request(|reply| Command::RunNow { job, reply })
            .await
            .ok_or(RunNowError::SupervisorStopped)?
    }

    /// Subscribe to job events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.job_events.subscribe()
    }

    /// Whether every job has retired (once modes).
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Wait until every job has retired.
    ///
    /// Only resolves in once modes, or when the supervisor stops.
    pub async fn wait_finished(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Drain grace from the configuration.
    pub fn drain_grace(&self) -> Duration {
        self.drain_grace
    }

    pub(crate) async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (reply, response) = oneshot::channel();
        self.commands.send(make(reply)).await.ok()?;
        response.await.ok()
    }
}

impl std::fmt::Debug for SupervisorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupervisorHandle")
            .field("time_zone", &self.time_zone)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
