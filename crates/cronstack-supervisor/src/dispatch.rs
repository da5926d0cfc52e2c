//! Dispatch, completion and timeout handling on the control loop.

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::control_loop::ControlLoop;
use crate::error::JobError;
use crate::events::JobEvent;
use crate::registry::{ActiveWorker, LastOutcome};
use crate::supervisor::Event;
use crate::worker::{WorkerId, WorkerOutcome};

impl ControlLoop {
    pub(crate) fn on_tick(&mut self, job: String, generation: u64, due: DateTime<Utc>) {
        if !self.accepting || generation != self.generation {
            debug!(job = %job, "Dropping stale tick");
            return;
        }
        let once = self.config.mode.is_once();
        let Some(record) = self.registry.get_mut(&job) else {
            return;
        };
        if record.retired {
            return;
        }
        if once {
            // First occurrence, run or skipped, completes a once-mode job.
            record.retired = true;
            record.trigger.stop();
        }

        if record.descriptor.prevent_overlapping && record.has_live_worker() {
            if record.descriptor.verbose {
                warn!(job = %job, "Job \"{}\" skipped because it is already running.", job);
            }
            self.publish(JobEvent::Skipped { job: job.clone(), due });
        } else {
            let _ = self.dispatch(&job, Some(due));
        }
        self.settle(&job);
    }

    /// Launch a worker for `job` and arm its timers.
    pub(crate) fn dispatch(&mut self, job: &str, due: Option<DateTime<Utc>>) -> Result<WorkerId, JobError> {
        let now = self.clock.now();
        let Some(record) = self.registry.get_mut(job) else {
            return Err(JobError::Launch(format!("unknown job \"{}\"", job)));
        };

        let launched = self
            .launcher
            .launch(&record.descriptor)
            .map_err(|e| JobError::Launch(e.to_string()))
            .and_then(|mut handle| match handle.take_completion() {
                Some(completion) => Ok((handle, completion)),
                None => Err(JobError::Launch("worker completion already taken".to_string())),
            });

        let (handle, completion) = match launched {
            Ok(launched) => launched,
            Err(err) => {
                record.stats.record_start(now);
                record.stats.record_outcome(LastOutcome::Failed);
                error!(job = %job, error = %err, "Job \"{}\" could not be started", job);
                self.publish(JobEvent::Failed {
                    job: job.to_string(),
                    worker: None,
                    error: err.clone(),
                });
                return Err(err);
            }
        };

        let worker = handle.id();
        let tx = self.events_tx.clone();
        let name = job.to_string();
        tokio::spawn(async move {
            let outcome = completion.outcome().await;
            let _ = tx.send(Event::WorkerExited {
                job: name,
                worker,
                outcome,
            });
        });

        let timeout = record.descriptor.timeout().map(|limit| {
            let tx = self.events_tx.clone();
            let name = job.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let _ = tx.send(Event::TimedOut { job: name, worker });
            })
        });

        record.workers.push(ActiveWorker::new(handle, timeout));
        record.stats.record_start(now);
        if record.descriptor.verbose {
            info!(job = %job, worker = %worker, "Job \"{}\" started", job);
        } else {
            debug!(job = %job, worker = %worker, "Job started");
        }

        self.publish(JobEvent::Dispatched {
            job: job.to_string(),
            worker,
            due,
        });
        self.publish_active();
        Ok(worker)
    }

    pub(crate) fn on_timeout(&mut self, job: String, worker: WorkerId) {
        let cancel_grace = self.config.cancel_grace();
        let Some(record) = self.registry.get_mut(&job) else {
            return;
        };
        let timeout_ms = record.descriptor.timeout_ms;
        // The worker may have finished while the timer event was queued.
        let Some(active) = record.worker_mut(worker) else {
            return;
        };
        if active.timed_out {
            return;
        }

        active.timed_out = true;
        active.handle.cancel("timeout");
        let tx = self.events_tx.clone();
        let name = job.clone();
        active.escalation = Some(tokio::spawn(async move {
            tokio::time::sleep(cancel_grace).await;
            let _ = tx.send(Event::Escalate { job: name, worker });
        }));
        record.stats.record_outcome(LastOutcome::TimedOut);

        let err = JobError::Timeout { timeout_ms };
        error!(job = %job, worker = %worker, "Job \"{}\" has crashed: {}", job, err);
        self.publish(JobEvent::Failed {
            job,
            worker: Some(worker),
            error: err,
        });
    }

    pub(crate) fn on_escalate(&mut self, job: String, worker: WorkerId) {
        let Some(active) = self
            .registry
            .get_mut(&job)
            .and_then(|record| record.worker_mut(worker))
        else {
            return;
        };
        warn!(
            job = %job,
            worker = %worker,
            "Job \"{}\" did not stop after cancellation, killing it", job
        );
        active.handle.kill();
    }

    pub(crate) fn on_worker_exit(&mut self, job: String, worker: WorkerId, outcome: WorkerOutcome) {
        let Some(record) = self.registry.get_mut(&job) else {
            debug!(job = %job, worker = %worker, "Exit of a worker from a replaced registry");
            return;
        };
        let Some(active) = record.remove_worker(worker) else {
            return;
        };
        let elapsed = active.started_at.elapsed();
        let verbose = record.descriptor.verbose;

        let event = if active.timed_out {
            // Already reported when the timer fired.
            debug!(job = %job, worker = %worker, state = ?outcome.state(), "Timed out worker stopped");
            match outcome {
                WorkerOutcome::Killed => Some(JobEvent::Killed {
                    job: job.clone(),
                    worker,
                }),
                _ => None,
            }
        } else {
            match outcome {
                WorkerOutcome::Succeeded => {
                    record.stats.record_outcome(LastOutcome::Succeeded);
                    if verbose {
                        info!(job = %job, elapsed_ms = elapsed.as_millis() as u64, "Job \"{}\" completed", job);
                    }
                    Some(JobEvent::Succeeded {
                        job: job.clone(),
                        worker,
                        elapsed,
                    })
                }
                WorkerOutcome::Failed(detail) => {
                    record.stats.record_outcome(LastOutcome::Failed);
                    let err = JobError::Crashed(detail);
                    error!(job = %job, worker = %worker, "Job \"{}\" has crashed: {}", job, err);
                    Some(JobEvent::Failed {
                        job: job.clone(),
                        worker: Some(worker),
                        error: err,
                    })
                }
                WorkerOutcome::Cancelled { reason } => {
                    record.stats.record_outcome(LastOutcome::Cancelled);
                    info!(job = %job, reason = %reason, "Job \"{}\" cancelled", job);
                    Some(JobEvent::Cancelled {
                        job: job.clone(),
                        worker,
                        reason,
                    })
                }
                WorkerOutcome::Killed => {
                    record.stats.record_outcome(LastOutcome::Killed);
                    warn!(job = %job, worker = %worker, "Job \"{}\" was killed", job);
                    Some(JobEvent::Killed {
                        job: job.clone(),
                        worker,
                    })
                }
            }
        };
        let idle = record.is_idle();
        drop(active);

        if let Some(event) = event {
            self.publish(event);
        }
        if idle {
            self.publish(JobEvent::Idle { job: job.clone() });
        }
        self.publish_active();
        self.settle(&job);
    }
}
