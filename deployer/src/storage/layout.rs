//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DeployerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "NESSUS_DEPLOYER_HOME";

/// Storage layout for the deployer
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Get the predefined accounts file path
    pub fn accounts_file(&self) -> File {
        File::new(self.base_dir.join("predefined_accounts.json"))
    }

    /// Get the symmetric key file path
    pub fn key_file(&self) -> File {
        File::new(self.base_dir.join("secret.key"))
    }

    /// Get the instance directory (database, logs)
    pub fn instance_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("instance"))
    }

    /// Get the run history database path
    pub fn database_file(&self) -> File {
        self.instance_dir().file("runs.db")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        self.instance_dir().subdir("logs")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DeployerError> {
        self.instance_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os(HOME_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Self::new(base_dir)
    }
}
