//! # cronstack supervisor
//!
//! Schedules named jobs from cron expressions and runs every occurrence in
//! an isolated worker process.
//!
//! ## Guarantees
//!
//! - **No overlap**: with `prevent_overlapping`, an occurrence that fires
//!   while the previous one is still running is skipped, never queued
//! - **Bounded run time**: a job with `timeout_ms` is cancelled when it
//!   runs too long and killed if it ignores the cancellation
//! - **Clean shutdown**: [`SupervisorHandle::drain_all`] cancels every
//!   worker, waits up to a grace period, then kills what is left
//! - **Safe reload**: [`SupervisorHandle::reload`] validates the new job set
//!   before touching anything
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cronstack_supervisor::{
//!     Entrypoint, JobDescriptor, ProcessLauncher, Supervisor, SupervisorConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let supervisor = Supervisor::new(SupervisorConfig::default(), Arc::new(ProcessLauncher::new()))
//!         .start()?;
//!
//!     supervisor
//!         .register(vec![JobDescriptor::new(
//!             "cleanup",
//!             "0 */5 * * * *",
//!             Entrypoint::shell("./cleanup.sh"),
//!         )
//!         .with_timeout_ms(60_000)])
//!         .await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.drain_all(Duration::from_secs(10)).await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod supervisor;
pub mod trigger;
pub mod worker;

mod control_loop;
mod dispatch;

// Re-exports
pub use clock::{AnchoredClock, Clock, SystemClock};
pub use config::{RunMode, SupervisorConfig};
pub use descriptor::{Entrypoint, JobDescriptor, ResultProtocol, StdioMode};
pub use error::{
    InvalidScheduleError, JobError, RegistrationError, ReloadError, RunNowError, SupervisorError,
    WorkerError,
};
pub use events::JobEvent;
pub use lifecycle::DrainReport;
pub use registry::{validate_descriptors, JobState, JobStatus, LastOutcome, RunStats};
pub use supervisor::{Supervisor, SupervisorHandle};
pub use trigger::{parse_schedule, CronTrigger};
pub use worker::{
    ErrorDetail, ProcessLauncher, WorkerHandle, WorkerId, WorkerLauncher, WorkerOutcome,
    WorkerReport, WorkerState,
};
