//! TOML settings for registration and export.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// How the collection of an experiment node is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExperimentCreation {
    /// Look the collection up by identifier and create it only if absent.
    #[default]
    GetOrCreate,
    /// Always create a new collection with a timestamp suffix.
    CreateUnique,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub base_dir: Option<PathBuf>,
    pub export_dir: Option<String>,
    pub hrm_base_dir: Option<PathBuf>,
    pub hrm_src_subdir: Option<String>,
    pub session_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resolutions of pre-rendered image representations, e.g. "256x256".
    /// Empty disables them.
    pub image_resolutions: Vec<String>,
    pub experiment_creation: ExperimentCreation,
    pub project_samples_enabled: bool,
    pub export: ExportSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            image_resolutions: Vec::new(),
            experiment_creation: ExperimentCreation::default(),
            project_samples_enabled: true,
            export: ExportSettings::default(),
        }
    }
}

impl Settings {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                let settings = Self::from_toml(&text)?;
                tracing::debug!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            None => Ok(Self::default()),
        }
    }
}
