//! OS signal handling.
//!
//! SIGTERM and SIGINT request a shutdown; SIGHUP requests a reload of the
//! job manifest. Signals are fanned out over a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::DaemonError;

/// Control request delivered to the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Drain all jobs and exit (SIGTERM, SIGINT).
    Shutdown,
    /// Re-read the manifest and swap the job set (SIGHUP).
    Reload,
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlSignal::Shutdown => write!(f, "SHUTDOWN"),
            ControlSignal::Reload => write!(f, "RELOAD"),
        }
    }
}

/// Fans control signals out to subscribers.
#[derive(Clone)]
pub struct SignalHandler {
    sender: broadcast::Sender<ControlSignal>,
    shutdown_requested: Arc<AtomicBool>,
    reload_requested: Arc<AtomicBool>,
}

impl SignalHandler {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            sender,
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            reload_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlSignal> {
        self.sender.subscribe()
    }

    /// Deliver a signal to all subscribers.
    pub fn send(&self, signal: ControlSignal) {
        debug!("Sending signal: {}", signal);
        match signal {
            ControlSignal::Shutdown => self.shutdown_requested.store(true, Ordering::SeqCst),
            ControlSignal::Reload => self.reload_requested.store(true, Ordering::SeqCst),
        }
        let _ = self.sender.send(signal);
    }

    pub fn request_shutdown(&self) {
        self.send(ControlSignal::Shutdown);
    }

    pub fn request_reload(&self) {
        self.send(ControlSignal::Reload);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn is_reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::SeqCst)
    }

    /// Clear the reload flag after handling.
    pub fn clear_reload_flag(&self) {
        self.reload_requested.store(false, Ordering::SeqCst);
    }

    /// Forward OS signals to this handler (Unix).
    #[cfg(unix)]
    pub fn install_os_handlers(&self) -> Result<(), DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            (SignalKind::terminate(), "SIGTERM", ControlSignal::Shutdown),
            (SignalKind::interrupt(), "SIGINT", ControlSignal::Shutdown),
            (SignalKind::hangup(), "SIGHUP", ControlSignal::Reload),
        ];

        for (kind, name, control) in kinds {
            let mut stream = signal(kind).map_err(|e| DaemonError::SignalSetup(format!("{}: {}", name, e)))?;
            let handler = self.clone();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    handler.send(control);
                }
            });
        }

        debug!("OS signal handlers installed (SIGTERM, SIGINT, SIGHUP)");
        Ok(())
    }

    /// Forward Ctrl+C to this handler (non-Unix).
    #[cfg(not(unix))]
    pub fn install_os_handlers(&self) -> Result<(), DaemonError> {
        let handler = self.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C");
                handler.request_shutdown();
            }
        });

        debug!("OS signal handlers installed (Ctrl+C only)");
        Ok(())
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
