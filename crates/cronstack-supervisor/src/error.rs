//! Error types for the job supervisor.

use std::path::PathBuf;

use thiserror::Error;

use crate::worker::ErrorDetail;

/// A job's schedule did not parse as a cron expression.
#[derive(Debug, Clone, Error)]
#[error("Invalid schedule \"{expression}\" for job \"{job}\": {reason}")]
pub struct InvalidScheduleError {
    pub job: String,
    pub expression: String,
    pub reason: String,
}

/// Errors raised while registering a batch of job descriptors.
///
/// Any of these rejects the whole batch; nothing is partially registered.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// A descriptor has an empty name.
    #[error("Job name must not be empty")]
    EmptyName,

    /// Two descriptors (or a descriptor and a live job) share a name.
    #[error("Job \"{0}\" can not be registered because its name is already in use")]
    DuplicateName(String),

    /// A descriptor's schedule is invalid.
    #[error(transparent)]
    InvalidSchedule(#[from] InvalidScheduleError),

    /// The supervisor's control loop has exited.
    #[error("Supervisor is not running")]
    SupervisorStopped,
}

impl RegistrationError {
    /// Name of the job this error is about, if it names one.
    pub fn job(&self) -> Option<&str> {
        match self {
            RegistrationError::DuplicateName(name) => Some(name),
            RegistrationError::InvalidSchedule(e) => Some(&e.job),
            RegistrationError::EmptyName | RegistrationError::SupervisorStopped => None,
        }
    }
}

/// Errors raised by `reload`.
#[derive(Debug, Clone, Error)]
pub enum ReloadError {
    /// The new descriptor set was rejected; the running registry is untouched.
    #[error("Reload rejected: {0}")]
    Validation(#[source] RegistrationError),

    /// The supervisor's control loop has exited.
    #[error("Supervisor is not running")]
    SupervisorStopped,
}

/// Errors raised by `run_now`.
#[derive(Debug, Clone, Error)]
pub enum RunNowError {
    #[error("Unknown job \"{0}\"")]
    UnknownJob(String),

    #[error("Job \"{0}\" is already running")]
    AlreadyRunning(String),

    /// The supervisor is draining or has been drained.
    #[error("Supervisor is not accepting new runs")]
    NotAccepting,

    #[error(transparent)]
    Job(#[from] JobError),

    #[error("Supervisor is not running")]
    SupervisorStopped,
}

/// Errors raised when starting a supervisor.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    #[error("Invalid supervisor configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single job occurrence.
///
/// These never escape the control loop; they are logged and published
/// as job events.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The worker reported a failure or died without reporting.
    #[error("Job has crashed: {0}")]
    Crashed(ErrorDetail),

    /// The occurrence exceeded the job's timeout.
    #[error("Timeout! Execution took longer than {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The worker could not be started.
    #[error("Failed to launch worker: {0}")]
    Launch(String),
}

/// Errors raised when launching a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker process could not be spawned.
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other launcher-specific failure.
    #[error("{0}")]
    Custom(String),
}
