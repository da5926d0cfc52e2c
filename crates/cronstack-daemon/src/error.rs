//! Daemon-related errors.

use thiserror::Error;

/// Errors raised while running the supervisor as a long-lived process.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Failed to set up signal handlers.
    #[error("Failed to set up signal handlers: {0}")]
    SignalSetup(String),

    /// The job manifest could not be loaded for a reload.
    #[error("Failed to load job manifest: {0}")]
    Manifest(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_setup_error() {
        let err = DaemonError::SignalSetup("no reactor".to_string());
        assert!(err.to_string().contains("signal handlers"));
        assert!(err.to_string().contains("no reactor"));
    }

    #[test]
    fn test_manifest_error() {
        let err = DaemonError::Manifest("cronstack.toml: missing".to_string());
        assert!(err.to_string().contains("cronstack.toml"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: DaemonError = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }
}
