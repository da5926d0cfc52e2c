//! Runner - keeps a supervisor alive until it is told to stop.
//!
//! Bridges control signals to the supervisor: a shutdown drains every job,
//! a reload re-reads the manifest and swaps the job set. In once modes the
//! runner also returns when every job has finished.

use std::sync::Arc;
use std::time::Duration;

use cronstack_supervisor::{DrainReport, JobDescriptor, SupervisorHandle};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::error::DaemonError;
use crate::signal::{ControlSignal, SignalHandler};

/// Where reloads get their job descriptors from.
pub trait ManifestSource: Send + Sync {
    fn load(&self) -> Result<Vec<JobDescriptor>, DaemonError>;
}

impl<F> ManifestSource for F
where
    F: Fn() -> Result<Vec<JobDescriptor>, DaemonError> + Send + Sync,
{
    fn load(&self) -> Result<Vec<JobDescriptor>, DaemonError> {
        self()
    }
}

/// Why the runner returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A shutdown was requested and the drain completed.
    Shutdown(DrainReport),
    /// Every job retired (once modes).
    Finished,
}

pub struct Runner {
    supervisor: SupervisorHandle,
    signals: SignalHandler,
    source: Option<Arc<dyn ManifestSource>>,
    drain_grace: Duration,
}

impl Runner {
    pub fn new(supervisor: SupervisorHandle, signals: SignalHandler) -> Self {
        let drain_grace = supervisor.drain_grace();
        Self {
            supervisor,
            signals,
            source: None,
            drain_grace,
        }
    }

    /// Enable reloads from `source`.
    pub fn with_manifest_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the drain grace used on shutdown.
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Run until shutdown or, in once modes, until every job is done.
    pub async fn run(self) -> Result<RunExit, DaemonError> {
        let mut signals = self.signals.subscribe();

        if self.signals.is_shutdown_requested() {
            return Ok(RunExit::Shutdown(self.shutdown().await));
        }

        loop {
            tokio::select! {
                _ = self.supervisor.wait_finished() => {
                    info!("All jobs finished");
                    return Ok(RunExit::Finished);
                }
                signal = signals.recv() => match signal {
                    Ok(ControlSignal::Shutdown) | Err(RecvError::Closed) => {
                        return Ok(RunExit::Shutdown(self.shutdown().await));
                    }
                    Ok(ControlSignal::Reload) => {
                        self.reload().await;
                        self.signals.clear_reload_flag();
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // The flags still hold what the missed signals asked for.
                        warn!("Missed {} control signal(s)", skipped);
                        if self.signals.is_shutdown_requested() {
                            return Ok(RunExit::Shutdown(self.shutdown().await));
                        }
                        if self.signals.is_reload_requested() {
                            self.reload().await;
                            self.signals.clear_reload_flag();
                        }
                    }
                },
            }
        }
    }

    async fn shutdown(&self) -> DrainReport {
        info!("Shutting down, waiting for running jobs to stop...");
        let report = self.supervisor.drain_all(self.drain_grace).await;
        if report.was_forced() {
            warn!(
                killed = report.killed,
                "Forced termination of {} job(s) that did not stop in time", report.killed
            );
        }
        if report.unconfirmed > 0 {
            error!(
                unconfirmed = report.unconfirmed,
                "Some jobs could not be confirmed stopped"
            );
        }
        info!("Shutdown complete");
        report
    }

    async fn reload(&self) {
        let Some(source) = &self.source else {
            warn!("Reload requested but no manifest source is configured");
            return;
        };

        let descriptors = match source.load() {
            Ok(descriptors) => descriptors,
            Err(e) => {
                error!("Reload failed, keeping current jobs: {}", e);
                return;
            }
        };

        let count = descriptors.len();
        match self.supervisor.reload(descriptors).await {
            Ok(()) => info!(jobs = count, "Jobs reloaded"),
            Err(e) => error!("Reload failed, keeping current jobs: {}", e),
        }
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
