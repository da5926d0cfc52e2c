//! Manifest schema definitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cronstack_supervisor::{Entrypoint, JobDescriptor, ResultProtocol, StdioMode, SupervisorConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::loader::ConfigLoader;

/// Root of `cronstack.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Config {
    /// Names of all jobs, in manifest order.
    pub fn job_names(&self) -> Vec<&str> {
        self.jobs.iter().map(|j| j.name.as_str()).collect()
    }

    /// Keep only the named jobs. An empty filter keeps everything.
    ///
    /// Returns the filter names that matched no job.
    pub fn retain_jobs(&mut self, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            return Vec::new();
        }
        let unknown = names
            .iter()
            .filter(|n| !self.jobs.iter().any(|j| &j.name == *n))
            .cloned()
            .collect();
        self.jobs.retain(|j| names.contains(&j.name));
        unknown
    }

    /// Build supervisor descriptors for every job.
    ///
    /// Relative working directories resolve against `base_dir`, which is
    /// also the default working directory.
    pub fn descriptors(&self, base_dir: &Path) -> Result<Vec<JobDescriptor>, ConfigError> {
        self.jobs.iter().map(|job| job.to_descriptor(base_dir)).collect()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `info` or `cronstack=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily rolling log files; console only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Emit JSON instead of human-readable lines.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
            json: false,
        }
    }
}

/// One `[[jobs]]` entry.
///
/// A job runs either `command` through the platform shell, or `program`
/// with `args`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    pub schedule: String,

    #[serde(default = "default_prevent_overlapping")]
    pub prevent_overlapping: bool,

    #[serde(default)]
    pub timeout_ms: u64,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub cwd: Option<String>,

    #[serde(default)]
    pub stdio: StdioMode,

    #[serde(default)]
    pub protocol: ResultProtocol,
}

fn default_prevent_overlapping() -> bool {
    true
}

impl JobConfig {
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            prevent_overlapping: default_prevent_overlapping(),
            timeout_ms: 0,
            verbose: false,
            command: None,
            program: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdio: StdioMode::default(),
            protocol: ResultProtocol::default(),
        }
    }

    /// Resolve the working directory against `base_dir`.
    pub fn resolved_cwd(&self, base_dir: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) => {
                let cwd = PathBuf::from(ConfigLoader::expand_path(cwd));
                if cwd.is_absolute() { cwd } else { base_dir.join(cwd) }
            }
            None => base_dir.to_path_buf(),
        }
    }

    /// Convert to a supervisor descriptor.
    pub fn to_descriptor(&self, base_dir: &Path) -> Result<JobDescriptor, ConfigError> {
        let entrypoint = match (&self.command, &self.program) {
            (Some(command), None) => Entrypoint::shell(command.clone()),
            (None, Some(program)) => {
                let mut entrypoint = Entrypoint::new(ConfigLoader::expand_path(program));
                entrypoint.args = self.args.clone();
                entrypoint
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    field: format!("jobs.{}", self.name),
                    message: "set either command or program, not both".to_string(),
                });
            }
            (None, None) => {
                return Err(ConfigError::MissingField(format!(
                    "jobs.{}.command or jobs.{}.program",
                    self.name, self.name
                )));
            }
        };

        let mut entrypoint = entrypoint
            .cwd(self.resolved_cwd(base_dir))
            .stdio(self.stdio)
            .protocol(self.protocol);
        entrypoint.env = self.env.clone();

        Ok(JobDescriptor {
            name: self.name.clone(),
            schedule: self.schedule.clone(),
            prevent_overlapping: self.prevent_overlapping,
            timeout_ms: self.timeout_ms,
            verbose: self.verbose,
            entrypoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.dir.is_none());
        assert!(config.jobs.is_empty());
        assert_eq!(config.supervisor.time_zone, "UTC");
    }

    #[test]
    fn test_command_job_to_descriptor() {
        let mut job = JobConfig::new("cleanup", "0 0 * * * *");
        job.command = Some("rm -rf /tmp/cache/*".to_string());
        job.timeout_ms = 5_000;

        let desc = job.to_descriptor(Path::new("/srv/app")).unwrap();
        assert_eq!(desc.name, "cleanup");
        assert_eq!(desc.timeout_ms, 5_000);
        assert!(desc.prevent_overlapping);
        assert_eq!(desc.entrypoint.cwd.as_deref(), Some(Path::new("/srv/app")));
        assert_eq!(desc.entrypoint.args.last().map(String::as_str), Some("rm -rf /tmp/cache/*"));
    }

    #[test]
    fn test_program_job_with_relative_cwd() {
        let mut job = JobConfig::new("report", "0 0 9 * * *");
        job.program = Some("./bin/report".to_string());
        job.args = vec!["--daily".to_string()];
        job.cwd = Some("reports".to_string());
        job.protocol = ResultProtocol::ExitCode;

        let desc = job.to_descriptor(Path::new("/srv/app")).unwrap();
        assert_eq!(desc.entrypoint.program, PathBuf::from("./bin/report"));
        assert_eq!(desc.entrypoint.args, vec!["--daily".to_string()]);
        assert_eq!(desc.entrypoint.cwd, Some(PathBuf::from("/srv/app/reports")));
        assert_eq!(desc.entrypoint.protocol, ResultProtocol::ExitCode);
    }

    #[test]
    fn test_job_without_entrypoint_is_rejected() {
        let job = JobConfig::new("empty", "* * * * * *");
        let err = job.to_descriptor(Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn test_job_with_both_entrypoints_is_rejected() {
        let mut job = JobConfig::new("both", "* * * * * *");
        job.command = Some("true".to_string());
        job.program = Some("/bin/true".to_string());
        let err = job.to_descriptor(Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_retain_jobs() {
        let mut config = Config::default();
        config.jobs.push(JobConfig::new("a", "* * * * * *"));
        config.jobs.push(JobConfig::new("b", "* * * * * *"));

        let unknown = config.retain_jobs(&["b".to_string(), "zzz".to_string()]);
        assert_eq!(unknown, vec!["zzz".to_string()]);
        assert_eq!(config.job_names(), vec!["b"]);

        assert!(config.retain_jobs(&[]).is_empty());
        assert_eq!(config.jobs.len(), 1);
    }
}
