//! Configuration for Stash
//!
//! Settings are read from `<home>/settings.json` when it exists and can be
//! overridden through `STASH_BACKEND`, `STASH_DATA_DIR` and
//! `STASH_NAMESPACE`. `<home>` is `STASH_HOME`, or `~/.stash`.

use crate::error::{Result, StashError};
use crate::DEFAULT_PRIMARY_KEY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "stash.db";
pub const DEFAULT_NAMESPACE: &str = "data_model";

/// Persistent store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Memory,
    Sqlite,
}

impl FromStr for Backend {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(StashError::InvalidConfig(format!(
                "unknown backend: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Memory => write!(f, "memory"),
            Backend::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub namespace: String,
    pub primary_key: String,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Sqlite,
            data_dir: Self::stash_home().join("data"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
        }
    }
}

impl StashConfig {
    /// The stash home directory (~/.stash)
    pub fn stash_home() -> PathBuf {
        if let Ok(path) = std::env::var("STASH_HOME") {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .map(|home| home.join(".stash"))
            .unwrap_or_else(|| PathBuf::from(".stash"))
    }

    pub fn settings_path() -> PathBuf {
        Self::stash_home().join(SETTINGS_FILE_NAME)
    }

    /// Load settings from the home directory and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::settings_path())?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load settings from `path`, falling back to defaults if it is missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            StashError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `STASH_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("STASH_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(data_dir) = lookup("STASH_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }
        if let Some(namespace) = lookup("STASH_NAMESPACE") {
            if namespace.trim().is_empty() {
                return Err(StashError::InvalidConfig(
                    "STASH_NAMESPACE is empty".to_string(),
                ));
            }
            self.namespace = namespace;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }
}
