use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{PersistenceError, Preferences};
use crate::config::get_home_dir;

const PREFERENCES_DIR: &str = ".config/growstudio";
const PREFERENCES_FILE: &str = "preferences.toml";

/// Load/save hooks for [`Preferences`].
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load(&self) -> Result<Preferences, PersistenceError>;

    async fn save(&self, preferences: &Preferences) -> Result<(), PersistenceError>;
}

/// Preferences kept in a single TOML file.
#[derive(Clone, Debug)]
pub struct TomlPreferenceStore {
    path: PathBuf,
}

impl TomlPreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `~/.config/growstudio/preferences.toml`.
    pub fn default_location() -> Self {
        let mut path = get_home_dir();
        path.push(PREFERENCES_DIR);
        path.push(PREFERENCES_FILE);
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PreferenceStore for TomlPreferenceStore {
    async fn load(&self) -> Result<Preferences, PersistenceError> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| self.io_error(e))?
        {
            warn!(
                "Preferences file {} does not exist, using defaults",
                self.path.display()
            );
            return Ok(Preferences::default());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        let preferences: Preferences =
            toml::from_str(&content).map_err(|source| PersistenceError::Parse {
                path: self.path.clone(),
                source,
            })?;

        info!(
            "Loaded {} doser labels from {}",
            preferences.doser_labels.len(),
            self.path.display()
        );
        Ok(preferences)
    }

    async fn save(&self, preferences: &Preferences) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let content = toml::to_string_pretty(preferences)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!("Preferences saved to {}", self.path.display());
        Ok(())
    }
}
