//! Locating and loading the manifest for a CLI invocation.

use std::path::{Path, PathBuf};

use cronstack_config::{Config, ConfigError, ConfigLoader, CONFIG_FILE_NAME};

/// A loaded manifest and the directory jobs run in.
pub(crate) struct Manifest {
    pub path: PathBuf,
    pub config: Config,
    pub base_dir: PathBuf,
}

impl Manifest {
    /// Load `explicit`, or search `base_dir` and the user config directory.
    pub(crate) fn load(explicit: Option<&Path>, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => ConfigLoader::find(&base_dir)
                .ok_or_else(|| ConfigError::NotFound(base_dir.join(CONFIG_FILE_NAME).display().to_string()))?,
        };
        let config = ConfigLoader::load(&path)?;
        Ok(Self {
            path,
            config,
            base_dir,
        })
    }
}
