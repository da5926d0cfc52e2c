//! # cronstack config
//!
//! Loading and validation of the `cronstack.toml` job manifest.

mod error;
mod loader;
mod schema;
mod validator;

// Re-exports
pub use error::ConfigError;
pub use loader::{ConfigLoader, CONFIG_FILE_NAME};
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
