//! Result protocol between a worker process and the supervisor.
//!
//! A worker reports its result by writing a single line to stdout:
//!
//! ```text
//! ::cronstack-result::{"status":"success"}
//! ::cronstack-result::{"status":"failure","error":{"name":"...","message":"...","causes":[],"stack":null}}
//! ```
//!
//! Errors are serialized into [`ErrorDetail`] so the message, the cause
//! chain and an optional backtrace survive the process boundary.

use std::error::Error;
use std::fmt;
use std::io::Write;
use std::process::ExitCode;

use serde::{Deserialize, Serialize};

/// Marker that starts a result line.
pub const RESULT_FRAME_PREFIX: &str = "::cronstack-result::";

/// Environment variable holding the job name inside a worker.
pub const JOB_NAME_ENV: &str = "CRONSTACK_JOB_NAME";

/// Error information carried across the worker boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error kind, e.g. a type name.
    pub name: String,
    /// Top-level message.
    pub message: String,
    /// Messages of the source chain, outermost first.
    #[serde(default)]
    pub causes: Vec<String>,
    /// Backtrace or stack, when the worker captured one.
    #[serde(default)]
    pub stack: Option<String>,
}

impl ErrorDetail {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            causes: Vec::new(),
            stack: None,
        }
    }

    /// Capture an error and its source chain.
    pub fn from_error(name: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        Self {
            name: name.into(),
            message: error.to_string(),
            causes,
            stack: None,
        }
    }

    /// Generic detail for a worker that died without reporting.
    pub fn crashed(context: impl Into<String>) -> Self {
        Self::new("WorkerCrashError", "process crashed").with_cause(context)
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)?;
        for cause in &self.causes {
            write!(f, "\n  caused by: {}", cause)?;
        }
        if let Some(stack) = &self.stack {
            write!(f, "\n{}", stack)?;
        }
        Ok(())
    }
}

/// Result sent by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WorkerReport {
    Success,
    Failure { error: ErrorDetail },
}

/// Encode a report as a result line (without the trailing newline).
pub fn encode_report(report: &WorkerReport) -> Result<String, serde_json::Error> {
    Ok(format!("{}{}", RESULT_FRAME_PREFIX, serde_json::to_string(report)?))
}

/// Decode a line of worker output.
///
/// Returns `None` for ordinary output lines.
pub fn decode_report(line: &str) -> Option<Result<WorkerReport, serde_json::Error>> {
    let payload = line.trim_end().strip_prefix(RESULT_FRAME_PREFIX)?;
    Some(serde_json::from_str(payload))
}

fn write_report(report: &WorkerReport) -> std::io::Result<()> {
    let line = encode_report(report).map_err(std::io::Error::other)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}

/// Report success from inside a worker.
pub fn report_success() -> std::io::Result<()> {
    write_report(&WorkerReport::Success)
}

/// Report a failure from inside a worker.
pub fn report_failure(name: &str, error: &(dyn Error + 'static)) -> std::io::Result<()> {
    let mut detail = ErrorDetail::from_error(name, error);
    let backtrace = std::backtrace::Backtrace::capture();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        detail.stack = Some(backtrace.to_string());
    }
    write_report(&WorkerReport::Failure { error: detail })
}

/// Run a job body inside a worker and report its result.
///
/// Intended for `main` of a job binary:
///
/// ```rust,no_run
/// use std::process::ExitCode;
///
/// fn main() -> ExitCode {
///     cronstack_supervisor::worker::run_job(|| -> Result<(), std::io::Error> {
///         println!("doing work");
///         Ok(())
///     })
/// }
/// ```
pub fn run_job<F, E>(job: F) -> ExitCode
where
    F: FnOnce() -> Result<(), E>,
    E: Into<Box<dyn Error + Send + Sync>>,
{
    let reported = match job() {
        Ok(()) => report_success().map(|_| ExitCode::SUCCESS),
        Err(e) => {
            let error: Box<dyn Error + Send + Sync> = e.into();
            report_failure(std::any::type_name::<E>(), error.as_ref()).map(|_| ExitCode::FAILURE)
        }
    };
    reported.unwrap_or(ExitCode::FAILURE)
}
