//! Supervisor configuration.

use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How long jobs keep being scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Run every job on its schedule until shut down.
    #[default]
    Continuous,
    /// Run each job on its next occurrence, then retire it.
    Once,
    /// Run each job immediately, once, ignoring its schedule.
    OnceNow,
}

impl RunMode {
    /// Whether jobs retire after one occurrence.
    pub fn is_once(&self) -> bool {
        !matches!(self, RunMode::Continuous)
    }
}

/// Global supervisor settings, fixed for the supervisor's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// IANA time zone used to evaluate schedules.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Run mode.
    #[serde(default)]
    pub mode: RunMode,

    /// How long a drain waits for workers to stop (in milliseconds).
    #[serde(default = "default_drain_grace")]
    pub drain_grace_ms: u64,

    /// How long a cancelled worker may take before it is killed (in milliseconds).
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_drain_grace() -> u64 {
    10_000
}

fn default_cancel_grace() -> u64 {
    5_000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            time_zone: default_time_zone(),
            mode: RunMode::default(),
            drain_grace_ms: default_drain_grace(),
            cancel_grace_ms: default_cancel_grace(),
        }
    }
}

impl SupervisorConfig {
    /// Set the run mode.
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the time zone.
    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = time_zone.into();
        self
    }

    /// Get the drain grace as a Duration.
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Get the cancel grace as a Duration.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Parse the configured time zone.
    pub fn tz(&self) -> Result<Tz, String> {
        self.time_zone
            .parse::<Tz>()
            .map_err(|_| format!("Unknown time zone: {}", self.time_zone))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.tz()?;
        if self.drain_grace_ms == 0 {
            return Err("drain_grace_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}
