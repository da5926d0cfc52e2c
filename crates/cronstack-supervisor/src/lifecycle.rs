//! Drain and reload.
//!
//! Both run on the caller's task and talk to the control loop through
//! commands, so the loop keeps processing worker exits while a drain waits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::descriptor::JobDescriptor;
use crate::error::ReloadError;
use crate::registry::prepare_records;
use crate::supervisor::{Command, SupervisorHandle};

/// How long to wait for killed workers to be confirmed gone.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// What a drain had to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Workers asked to stop cooperatively.
    pub cancelled: usize,
    /// Workers still running after the grace period and force-killed.
    pub killed: usize,
    /// Workers not confirmed terminated even after the kill.
    pub unconfirmed: usize,
}

impl DrainReport {
    /// Whether forced termination was needed.
    pub fn was_forced(&self) -> bool {
        self.killed > 0
    }
}

impl SupervisorHandle {
    /// Stop all triggers and wind down every running worker.
    ///
    /// Workers are cancelled first; those still running after `grace` are
    /// killed. Always returns, within `grace` plus a small fixed bound.
    /// Triggers stay stopped until the next reload.
    pub async fn drain_all(&self, grace: Duration) -> DrainReport {
        let _guard = self.lifecycle.lock().await;
        self.drain_locked(grace).await
    }

    async fn drain_locked(&self, grace: Duration) -> DrainReport {
        let Some((cancelled, mut active)) = self.request(|reply| Command::Freeze { reply }).await else {
            return DrainReport::default();
        };
        let mut report = DrainReport {
            cancelled,
            ..Default::default()
        };
        if cancelled > 0 {
            info!("Waiting for {} running job(s) to stop", cancelled);
        }

        let drained = timeout(grace, active.wait_for(|count| *count == 0)).await.is_ok();
        if drained {
            return report;
        }

        report.killed = self
            .request(|reply| Command::KillAll { reply })
            .await
            .unwrap_or_default();
        warn!(
            "{} job(s) did not stop within {:?} and were killed",
            report.killed, grace
        );

        let confirmed = timeout(KILL_CONFIRM_TIMEOUT, active.wait_for(|count| *count == 0))
            .await
            .is_ok();
        if !confirmed {
            report.unconfirmed = *active.borrow();
            warn!("{} killed job(s) could not be confirmed stopped", report.unconfirmed);
        }
        report
    }

    /// Replace every job with `descriptors`.
    ///
    /// The new set is validated first; if it is rejected nothing changes.
    /// Otherwise the current jobs are drained with the configured grace and
    /// the new registry is installed and started.
    pub async fn reload(&self, descriptors: Vec<JobDescriptor>) -> Result<(), ReloadError> {
        let _guard = self.lifecycle.lock().await;
        let records = prepare_records(descriptors, self.time_zone, &self.clock).map_err(ReloadError::Validation)?;

        let report = self.drain_locked(self.drain_grace).await;
        if report.was_forced() {
            warn!(killed = report.killed, "Reload had to kill running jobs");
        }

        let names = self
            .request(|reply| Command::Install { records, reply })
            .await
            .ok_or(ReloadError::SupervisorStopped)?;
        info!(jobs = names.len(), "Reloaded jobs");
        Ok(())
    }
}
