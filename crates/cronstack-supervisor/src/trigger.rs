//! CronTrigger - cron expression driven tick source.
//!
//! A trigger owns a parsed schedule and, once started, a background task
//! that sleeps until each due time and invokes a tick callback. Missed
//! occurrences are never replayed: after a late wake the next due time is
//! computed from the current time.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::InvalidScheduleError;

/// Parse a cron expression.
///
/// Accepts the 6-field (`sec min hour dom month dow`) and 7-field (with
/// year) forms. A classic 5-field expression gets a `0` seconds field.
pub fn parse_schedule(expression: &str) -> Result<Schedule, cron::error::Error> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", trimmed))
    } else {
        Schedule::from_str(trimmed)
    }
}

/// Cron schedule bound to a time zone and a clock.
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    time_zone: Tz,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    fire_count: Arc<AtomicU64>,
}

impl CronTrigger {
    /// Create a trigger for `job` from a cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidScheduleError`] naming the job when the expression
    /// does not parse.
    pub fn new(
        job: &str,
        expression: &str,
        time_zone: Tz,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidScheduleError> {
        let schedule = parse_schedule(expression).map_err(|e| InvalidScheduleError {
            job: job.to_string(),
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            time_zone,
            clock,
            stop: CancellationToken::new(),
            task: Mutex::new(None),
            fire_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// The cron expression as given.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Number of ticks fired so far.
    pub fn fire_count(&self) -> u64 {
        self.fire_count.load(Ordering::Relaxed)
    }

    /// Whether the trigger is started and not stopped.
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some() && !self.stop.is_cancelled()
    }

    /// Whether `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Next due time strictly after now.
    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        if self.is_stopped() {
            return None;
        }
        next_after(&self.schedule, self.time_zone, self.clock.now())
    }

    /// Start firing `on_tick` with each due time.
    ///
    /// Starting an already started or stopped trigger does nothing.
    pub fn start<F>(&self, on_tick: F)
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        let mut task = self.task.lock();
        if task.is_some() || self.stop.is_cancelled() {
            warn!("CronTrigger \"{}\" already started", self.expression);
            return;
        }

        let schedule = self.schedule.clone();
        let time_zone = self.time_zone;
        let clock = self.clock.clone();
        let stop = self.stop.clone();
        let fire_count = self.fire_count.clone();
        let expression = self.expression.clone();

        *task = Some(tokio::spawn(async move {
            let mut cursor = clock.now();
            loop {
                let Some(due) = next_after(&schedule, time_zone, cursor) else {
                    debug!("CronTrigger \"{}\" has no upcoming schedule", expression);
                    break;
                };

                let wait = (due - clock.now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                // Let work finishing at this same instant report first.
                tokio::task::yield_now().await;
                if stop.is_cancelled() {
                    break;
                }

                fire_count.fetch_add(1, Ordering::Relaxed);
                on_tick(due);

                // Resume from whichever is later so a late wake skips the
                // occurrences it slept through.
                cursor = clock.now().max(due);
            }
            debug!("CronTrigger \"{}\" stopped", expression);
        }));
    }

    /// Cancel all future ticks. Idempotent.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            self.stop.cancel();
            debug!("CronTrigger \"{}\" cancelled", self.expression);
        }
    }
}

impl Drop for CronTrigger {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for CronTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronTrigger")
            .field("expression", &self.expression)
            .field("time_zone", &self.time_zone)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

fn next_after(schedule: &Schedule, time_zone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&time_zone))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
