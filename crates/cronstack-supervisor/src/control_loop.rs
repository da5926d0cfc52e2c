//! The supervisor's control loop.
//!
//! Owns the registry. Commands and internal events are handled one at a
//! time, so every state transition is serialized here.

use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::{RunMode, SupervisorConfig};
use crate::error::{RegistrationError, RunNowError};
use crate::events::JobEvent;
use crate::registry::{check_conflicts, JobRecord, JobStatus, Registry};
use crate::supervisor::{Command, Event};
use crate::worker::{WorkerId, WorkerLauncher};

pub(crate) struct ControlLoop {
    pub(crate) config: SupervisorConfig,
    pub(crate) time_zone: Tz,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) launcher: Arc<dyn WorkerLauncher>,
    pub(crate) registry: Registry,
    /// Bumped on every registry swap; ticks carry the value they were armed with.
    pub(crate) generation: u64,
    pub(crate) accepting: bool,
    pub(crate) events_tx: mpsc::UnboundedSender<Event>,
    job_events: broadcast::Sender<JobEvent>,
    active: watch::Sender<usize>,
    finished: watch::Sender<bool>,
}

impl ControlLoop {
    pub(crate) fn new(
        config: SupervisorConfig,
        time_zone: Tz,
        clock: Arc<dyn Clock>,
        launcher: Arc<dyn WorkerLauncher>,
        events_tx: mpsc::UnboundedSender<Event>,
        job_events: broadcast::Sender<JobEvent>,
        finished: watch::Sender<bool>,
    ) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            config,
            time_zone,
            clock,
            launcher,
            registry: Registry::new(),
            generation: 0,
            accepting: true,
            events_tx,
            job_events,
            active,
            finished,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
            }
        }

        // Every handle is gone; nothing can observe the jobs any more.
        debug!("Supervisor control loop exiting");
        for record in self.registry.values() {
            record.trigger.stop();
            for worker in &record.workers {
                worker.handle.kill();
            }
        }
        self.finished.send_replace(true);
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Tick { job, generation, due } => self.on_tick(job, generation, due),
            Event::WorkerExited { job, worker, outcome } => self.on_worker_exit(job, worker, outcome),
            Event::TimedOut { job, worker } => self.on_timeout(job, worker),
            Event::Escalate { job, worker } => self.on_escalate(job, worker),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Register { records, reply } => {
                let _ = reply.send(self.register(records));
            }
            Command::Freeze { reply } => {
                let cancelled = self.freeze();
                let _ = reply.send((cancelled, self.active.subscribe()));
            }
            Command::KillAll { reply } => {
                let _ = reply.send(self.kill_all());
            }
            Command::Install { records, reply } => {
                let _ = reply.send(self.install(records));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::RunNow { job, reply } => {
                let _ = reply.send(self.run_now(&job));
            }
        }
    }

    fn register(&mut self, records: Vec<JobRecord>) -> Result<Vec<String>, RegistrationError> {
        if !self.accepting {
            return Err(RegistrationError::SupervisorStopped);
        }
        check_conflicts(&self.registry, &records)?;
        Ok(self.activate_all(records))
    }

    /// Swap in a new registry. The old records are dropped, which stops
    /// their triggers.
    fn install(&mut self, records: Vec<JobRecord>) -> Vec<String> {
        self.generation += 1;
        self.registry.clear();
        self.accepting = true;
        self.publish_active();
        self.activate_all(records)
    }

    fn activate_all(&mut self, records: Vec<JobRecord>) -> Vec<String> {
        let names: Vec<String> = records.iter().map(|r| r.name().to_string()).collect();
        for record in records {
            let name = record.name().to_string();
            self.registry.insert(name.clone(), record);
            self.activate(&name);
        }
        self.check_finished();
        names
    }

    fn activate(&mut self, job: &str) {
        if self.config.mode == RunMode::OnceNow {
            if let Some(record) = self.registry.get_mut(job) {
                record.retired = true;
                record.trigger.stop();
            }
            let _ = self.dispatch(job, None);
            self.settle(job);
            return;
        }

        let Some(record) = self.registry.get(job) else {
            return;
        };
        let tx = self.events_tx.clone();
        let generation = self.generation;
        let name = job.to_string();
        record.trigger.start(move |due| {
            let _ = tx.send(Event::Tick {
                job: name.clone(),
                generation,
                due,
            });
        });
        debug!(
            job = %job,
            schedule = %record.descriptor.schedule,
            next = ?record.trigger.next_occurrence(),
            "Job scheduled"
        );
    }

    /// Stop every trigger, refuse new work and ask all workers to stop.
    fn freeze(&mut self) -> usize {
        self.accepting = false;
        let mut cancelled = 0;
        for record in self.registry.values() {
            record.trigger.stop();
            for worker in &record.workers {
                worker.handle.cancel("shutdown");
                cancelled += 1;
            }
        }
        cancelled
    }

    fn kill_all(&mut self) -> usize {
        let mut killed = 0;
        for record in self.registry.values() {
            for worker in &record.workers {
                warn!(job = %record.name(), worker = %worker.id(), "Forcing worker to stop");
                worker.handle.kill();
                killed += 1;
            }
        }
        killed
    }

    fn status(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self.registry.values().map(JobRecord::status).collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    fn run_now(&mut self, job: &str) -> Result<WorkerId, RunNowError> {
        if !self.accepting {
            return Err(RunNowError::NotAccepting);
        }
        let record = self
            .registry
            .get(job)
            .ok_or_else(|| RunNowError::UnknownJob(job.to_string()))?;
        if record.retired {
            return Err(RunNowError::UnknownJob(job.to_string()));
        }
        if record.descriptor.prevent_overlapping && record.has_live_worker() {
            return Err(RunNowError::AlreadyRunning(job.to_string()));
        }
        Ok(self.dispatch(job, None)?)
    }

    /// Remove a once-mode job that has run and gone idle.
    pub(crate) fn settle(&mut self, job: &str) {
        let retire = self
            .registry
            .get(job)
            .is_some_and(|record| record.retired && record.is_idle());
        if retire {
            self.registry.remove(job);
            info!(job = %job, "Job \"{}\" retired", job);
            self.publish(JobEvent::Retired { job: job.to_string() });
            self.check_finished();
        }
    }

    fn check_finished(&self) {
        if self.config.mode.is_once() && self.registry.is_empty() {
            self.finished.send_replace(true);
        }
    }

    pub(crate) fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.job_events.send(event);
    }

    /// Push the number of active workers to drain waiters.
    pub(crate) fn publish_active(&self) {
        let count = self.registry.values().map(|r| r.workers.len()).sum();
        self.active.send_replace(count);
    }
}
