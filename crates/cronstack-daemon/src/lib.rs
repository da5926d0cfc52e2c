//! # cronstack daemon
//!
//! Runs a supervisor as a long-lived process.
//!
//! - Signal handling (SIGTERM/SIGINT drain and exit, SIGHUP reloads the
//!   job manifest)
//! - A [`Runner`] that bridges those signals to the supervisor and returns
//!   when it is shut down or, in once modes, when every job has finished
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cronstack_daemon::{Runner, SignalHandler};
//!
//! let signals = SignalHandler::new();
//! signals.install_os_handlers()?;
//! let exit = Runner::new(supervisor, signals).run().await?;
//! ```

pub mod error;
pub mod runner;
pub mod signal;

// Re-exports
pub use error::DaemonError;
pub use runner::{ManifestSource, RunExit, Runner};
pub use signal::{ControlSignal, SignalHandler};
