//! Job records and the registry that holds them.
//!
//! Records are owned by the supervisor's control loop. Everything outside
//! the loop sees jobs through [`JobStatus`] snapshots.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::clock::Clock;
use crate::descriptor::JobDescriptor;
use crate::error::RegistrationError;
use crate::trigger::CronTrigger;
use crate::worker::{WorkerHandle, WorkerId};

/// Run state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No worker is active.
    Idle,
    /// At least one worker is running normally.
    Running,
    /// Every active worker has been asked to stop.
    Cancelling,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Cancelling => "cancelling",
        };
        write!(f, "{}", s)
    }
}

/// How the most recent occurrence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
    Killed,
}

/// Run statistics kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub runs: u64,
    pub failures: u64,
    pub last_outcome: Option<LastOutcome>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl RunStats {
    pub(crate) fn record_start(&mut self, at: DateTime<Utc>) {
        self.runs += 1;
        self.last_run_at = Some(at);
    }

    pub(crate) fn record_outcome(&mut self, outcome: LastOutcome) {
        if matches!(outcome, LastOutcome::Failed | LastOutcome::TimedOut) {
            self.failures += 1;
        }
        self.last_outcome = Some(outcome);
    }
}

/// Snapshot of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub name: String,
    pub schedule: String,
    pub state: JobState,
    pub next_occurrence: Option<DateTime<Utc>>,
    pub active_workers: usize,
    pub prevent_overlapping: bool,
    pub timeout_ms: u64,
    pub retired: bool,
    #[serde(flatten)]
    pub stats: RunStats,
}

/// A worker the supervisor is tracking, with its timers.
pub(crate) struct ActiveWorker {
    pub handle: WorkerHandle,
    pub started_at: Instant,
    pub timeout: Option<JoinHandle<()>>,
    pub escalation: Option<JoinHandle<()>>,
    pub timed_out: bool,
}

impl ActiveWorker {
    pub fn new(handle: WorkerHandle, timeout: Option<JoinHandle<()>>) -> Self {
        Self {
            handle,
            started_at: Instant::now(),
            timeout,
            escalation: None,
            timed_out: false,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.handle.id()
    }

    pub fn is_cancelling(&self) -> bool {
        self.handle.is_cancel_requested()
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        if let Some(timer) = self.timeout.take() {
            timer.abort();
        }
        if let Some(timer) = self.escalation.take() {
            timer.abort();
        }
    }
}

/// Mutable state of one job, owned by the control loop.
pub(crate) struct JobRecord {
    pub descriptor: JobDescriptor,
    pub trigger: CronTrigger,
    pub workers: Vec<ActiveWorker>,
    pub stats: RunStats,
    /// Once-mode job whose trigger has fired; leaves the registry when idle.
    pub retired: bool,
}

impl JobRecord {
    pub fn new(descriptor: JobDescriptor, time_zone: Tz, clock: Arc<dyn Clock>) -> Result<Self, RegistrationError> {
        let trigger = CronTrigger::new(&descriptor.name, &descriptor.schedule, time_zone, clock)?;
        Ok(Self {
            descriptor,
            trigger,
            workers: Vec::new(),
            stats: RunStats::default(),
            retired: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn state(&self) -> JobState {
        if self.workers.is_empty() {
            JobState::Idle
        } else if self.workers.iter().any(|w| !w.is_cancelling()) {
            JobState::Running
        } else {
            JobState::Cancelling
        }
    }

    pub fn is_idle(&self) -> bool {
        self.workers.is_empty()
    }

    /// Whether a worker is still running. One that already finished but
    /// whose exit has not been processed yet does not count.
    pub fn has_live_worker(&self) -> bool {
        self.workers.iter().any(|w| !w.handle.state().is_terminal())
    }

    pub fn worker_mut(&mut self, id: WorkerId) -> Option<&mut ActiveWorker> {
        self.workers.iter_mut().find(|w| w.id() == id)
    }

    pub fn remove_worker(&mut self, id: WorkerId) -> Option<ActiveWorker> {
        let index = self.workers.iter().position(|w| w.id() == id)?;
        Some(self.workers.remove(index))
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            name: self.descriptor.name.clone(),
            schedule: self.descriptor.schedule.clone(),
            state: self.state(),
            next_occurrence: self.trigger.next_occurrence(),
            active_workers: self.workers.len(),
            prevent_overlapping: self.descriptor.prevent_overlapping,
            timeout_ms: self.descriptor.timeout_ms,
            retired: self.retired,
            stats: self.stats.clone(),
        }
    }
}

pub(crate) type Registry = HashMap<String, JobRecord>;

/// Validate a batch of descriptors and build their records.
///
/// Rejects the whole batch on an empty name, a name used twice in the
/// batch, or an invalid schedule.
pub(crate) fn prepare_records(
    descriptors: Vec<JobDescriptor>,
    time_zone: Tz,
    clock: &Arc<dyn Clock>,
) -> Result<Vec<JobRecord>, RegistrationError> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if descriptor.name.trim().is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if !seen.insert(descriptor.name.clone()) {
            return Err(RegistrationError::DuplicateName(descriptor.name));
        }
        records.push(JobRecord::new(descriptor, time_zone, clock.clone())?);
    }

    Ok(records)
}

/// Validate descriptors without building records.
pub fn validate_descriptors(descriptors: &[JobDescriptor], time_zone: Tz) -> Result<(), RegistrationError> {
    let clock: Arc<dyn Clock> = Arc::new(crate::clock::SystemClock);
    prepare_records(descriptors.to_vec(), time_zone, &clock).map(|_| ())
}

/// Fail if any record's name is already live.
pub(crate) fn check_conflicts(registry: &Registry, records: &[JobRecord]) -> Result<(), RegistrationError> {
    match records.iter().find(|r| registry.contains_key(r.name())) {
        Some(record) => Err(RegistrationError::DuplicateName(record.name().to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::descriptor::Entrypoint;

    fn desc(name: &str, schedule: &str) -> JobDescriptor {
        JobDescriptor::new(name, schedule, Entrypoint::new("/bin/true"))
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(SystemClock)
    }

    #[test]
    fn test_prepare_valid_batch() {
        let records = prepare_records(
            vec![desc("a", "* * * * * *"), desc("b", "0 0 * * *")],
            chrono_tz::UTC,
            &clock(),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state(), JobState::Idle);
        assert!(!records[0].retired);
    }

    #[test]
    fn test_duplicate_in_batch_is_rejected() {
        let err = prepare_records(
            vec![desc("a", "* * * * * *"), desc("a", "*/2 * * * * *")],
            chrono_tz::UTC,
            &clock(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RegistrationError::DuplicateName(ref n) if n == "a"));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let err = prepare_records(vec![desc("  ", "* * * * * *")], chrono_tz::UTC, &clock())
            .err()
            .unwrap();
        assert!(matches!(err, RegistrationError::EmptyName));
    }

    #[test]
    fn test_invalid_schedule_names_job() {
        let err = validate_descriptors(&[desc("ok", "* * * * * *"), desc("bad", "nope")], chrono_tz::UTC)
            .unwrap_err();
        assert_eq!(err.job(), Some("bad"));
    }

    #[test]
    fn test_conflicts_with_live_registry() {
        let mut registry = Registry::new();
        for record in prepare_records(vec![desc("a", "* * * * * *")], chrono_tz::UTC, &clock()).unwrap() {
            registry.insert(record.name().to_string(), record);
        }
        let incoming =
            prepare_records(vec![desc("b", "* * * * * *"), desc("a", "* * * * * *")], chrono_tz::UTC, &clock())
                .unwrap();
        let err = check_conflicts(&registry, &incoming).unwrap_err();
        assert_eq!(err.job(), Some("a"));
    }

    #[test]
    fn test_run_stats() {
        let mut stats = RunStats::default();
        stats.record_start(Utc::now());
        stats.record_outcome(LastOutcome::Succeeded);
        stats.record_start(Utc::now());
        stats.record_outcome(LastOutcome::TimedOut);
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.last_outcome, Some(LastOutcome::TimedOut));
    }
}
