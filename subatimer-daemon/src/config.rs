//! TOML file configuration.
//!
//! The file carries the daemon-only `[database]` section plus the shared
//! pipeline settings, which map straight onto `subatimer_core::settings`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use subatimer_core::settings::Settings;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(flatten)]
    pub settings: Settings,
}

/// Database configuration section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Postgres connection URL. `DATABASE_URL` in the environment wins.
    pub url: Option<String>,
}

impl FileConfig {
    /// The effective database URL, environment first.
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.database.url.clone())
    }
}

/// Loads and reloads the configuration file.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<FileConfig> {
        let text = std::fs::read_to_string(&self.path)?;
        let config: FileConfig = toml::from_str(&text)?;
        Ok(config)
    }
}
