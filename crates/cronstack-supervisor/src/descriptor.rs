//! Job descriptors: the immutable input the supervisor schedules.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Description of one scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique job name.
    pub name: String,

    /// Cron expression.
    pub schedule: String,

    /// Skip an occurrence while a previous one is still running.
    #[serde(default = "default_prevent_overlapping")]
    pub prevent_overlapping: bool,

    /// Maximum run time in milliseconds (0 = unbounded).
    #[serde(default)]
    pub timeout_ms: u64,

    /// Log starts, completions and skipped occurrences.
    #[serde(default)]
    pub verbose: bool,

    /// What the worker runs.
    pub entrypoint: Entrypoint,
}

fn default_prevent_overlapping() -> bool {
    true
}

impl JobDescriptor {
    /// Create a descriptor with default options.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>, entrypoint: Entrypoint) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            prevent_overlapping: default_prevent_overlapping(),
            timeout_ms: 0,
            verbose: false,
            entrypoint,
        }
    }

    /// Set the timeout in milliseconds.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Allow occurrences to run concurrently.
    pub fn allow_overlapping(mut self) -> Self {
        self.prevent_overlapping = false;
        self
    }

    /// Enable verbose diagnostics.
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// The timeout, if bounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// How a worker locates and runs the job's code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entrypoint {
    /// Program to execute.
    pub program: PathBuf,

    /// Program arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// What happens to the job's own output.
    #[serde(default)]
    pub stdio: StdioMode,

    /// How the job's result is determined.
    #[serde(default)]
    pub protocol: ResultProtocol,
}

impl Entrypoint {
    /// Run `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            stdio: StdioMode::default(),
            protocol: ResultProtocol::default(),
        }
    }

    /// Run `command` through the platform shell.
    pub fn shell(command: impl Into<String>) -> Self {
        let (shell, flag) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };
        Self::new(shell).arg(flag).arg(command)
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the stdio mode.
    pub fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    /// Set the result protocol.
    pub fn protocol(mut self, protocol: ResultProtocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Destination of a worker's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StdioMode {
    /// Relay output to the supervisor's log.
    #[default]
    Inherit,
    /// Discard output.
    Ignore,
}

/// How a finished worker's result is decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultProtocol {
    /// The worker must send a result report; exiting without one is a crash.
    #[default]
    Structured,
    /// Without a report, exit code 0 means success.
    ExitCode,
}
