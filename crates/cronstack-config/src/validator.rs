//! Manifest validation.

use std::collections::HashSet;
use std::path::Path;

use cronstack_supervisor::parse_schedule;

use crate::error::ConfigError;
use crate::schema::{Config, JobConfig};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Manifest validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the manifest.
    ///
    /// `base_dir` is where relative job working directories resolve.
    pub fn validate(config: &Config, base_dir: &Path) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_supervisor(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_jobs(config, base_dir, &mut result);

        Ok(result)
    }

    fn validate_supervisor(config: &Config, result: &mut ValidationResult) {
        let supervisor = &config.supervisor;

        if let Err(message) = supervisor.tz() {
            result.add_error(ValidationError::new("supervisor.time_zone", message));
        }

        if supervisor.drain_grace_ms == 0 {
            result.add_error(ValidationError::new(
                "supervisor.drain_grace_ms",
                "drain_grace_ms must be greater than 0",
            ));
        }

        if supervisor.cancel_grace_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "supervisor.cancel_grace_ms",
                "cancel_grace_ms is 0, timed out jobs are killed without a chance to clean up",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.to_lowercase();
        // Anything with '=' or ',' is a filter directive, checked when installed.
        if !level.contains('=') && !level.contains(',') && !LOG_LEVELS.contains(&level.as_str()) {
            result.add_warning(ValidationWarning::new(
                "logging.level",
                format!(
                    "Unknown log level '{}', valid values: {:?}",
                    config.logging.level, LOG_LEVELS
                ),
            ));
        }
    }

    fn validate_jobs(config: &Config, base_dir: &Path, result: &mut ValidationResult) {
        if config.jobs.is_empty() {
            result.add_warning(ValidationWarning::new("jobs", "No jobs defined"));
        }

        let mut seen = HashSet::new();
        for (index, job) in config.jobs.iter().enumerate() {
            let path = if job.name.is_empty() {
                format!("jobs[{}]", index)
            } else {
                format!("jobs.{}", job.name)
            };

            if job.name.trim().is_empty() {
                result.add_error(ValidationError::new(&path, "Job name cannot be empty"));
            } else if !seen.insert(job.name.as_str()) {
                result.add_error(ValidationError::new(
                    &path,
                    format!("Job name '{}' is used more than once", job.name),
                ));
            }

            Self::validate_job(job, &path, base_dir, result);
        }
    }

    fn validate_job(job: &JobConfig, path: &str, base_dir: &Path, result: &mut ValidationResult) {
        if let Err(e) = parse_schedule(&job.schedule) {
            result.add_error(ValidationError::new(
                format!("{}.schedule", path),
                format!("Invalid cron expression '{}': {}", job.schedule, e),
            ));
        }

        match (&job.command, &job.program) {
            (None, None) => result.add_error(ValidationError::new(
                path,
                "Either command or program must be set",
            )),
            (Some(_), Some(_)) => result.add_error(ValidationError::new(
                path,
                "Only one of command or program may be set",
            )),
            (Some(_), None) if !job.args.is_empty() => result.add_warning(ValidationWarning::new(
                format!("{}.args", path),
                "args are ignored for command jobs",
            )),
            _ => {}
        }

        if !job.prevent_overlapping && job.timeout_ms == 0 {
            result.add_warning(ValidationWarning::new(
                path,
                "Overlapping runs are allowed without a timeout, runs may pile up",
            ));
        }

        let cwd = job.resolved_cwd(base_dir);
        if !cwd.is_dir() {
            result.add_warning(ValidationWarning::new(
                format!("{}.cwd", path),
                format!("Working directory does not exist: {:?}", cwd),
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
