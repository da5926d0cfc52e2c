//! Job events published by the supervisor.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::JobError;
use crate::worker::WorkerId;

/// A state change of a job, as seen by subscribers.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A worker was launched for an occurrence.
    Dispatched {
        job: String,
        worker: WorkerId,
        /// Scheduled time of the occurrence; `None` for manual runs.
        due: Option<DateTime<Utc>>,
    },
    /// An occurrence was dropped because the job was still running.
    Skipped { job: String, due: DateTime<Utc> },
    Succeeded {
        job: String,
        worker: WorkerId,
        elapsed: Duration,
    },
    /// An occurrence crashed, timed out or could not be launched.
    Failed {
        job: String,
        worker: Option<WorkerId>,
        error: JobError,
    },
    Cancelled {
        job: String,
        worker: WorkerId,
        reason: String,
    },
    Killed { job: String, worker: WorkerId },
    /// The job has no active worker left.
    Idle { job: String },
    /// A once-mode job finished and left the registry.
    Retired { job: String },
}

impl JobEvent {
    /// Name of the job the event is about.
    pub fn job(&self) -> &str {
        match self {
            JobEvent::Dispatched { job, .. }
            | JobEvent::Skipped { job, .. }
            | JobEvent::Succeeded { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job, .. }
            | JobEvent::Killed { job, .. }
            | JobEvent::Idle { job }
            | JobEvent::Retired { job } => job,
        }
    }

    /// Whether this is a timeout failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            JobEvent::Failed {
                error: JobError::Timeout { .. },
                ..
            }
        )
    }
}
