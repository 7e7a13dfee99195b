//! # Persistence Module
//!
//! Panel preferences that outlive a run: the doser label mapping and the
//! compact display toggle. The core never reads or writes files itself; the
//! binary loads [`Preferences`] at startup, hands the labels to the
//! controller and saves them again on shutdown.
//!
//! ## Error Handling Strategy
//! Missing files degrade to defaults with a warning so a fresh install starts
//! normally. Unreadable or unparsable files are reported as
//! [`PersistenceError`] and left untouched on disk.

pub mod store;

pub use store::{PreferenceStore, TomlPreferenceStore};

use crate::reservoir::DoserLabels;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// What the panel remembers between runs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Preferences {
    /// Hide the history plots and show only the latest readings
    pub compact_view: bool,
    /// Nutrient label per doser id
    pub doser_labels: DoserLabels,
}
