//! Persistent user settings
//!
//! Stores defaults in ~/.config/nf3/settings.json. Command-line flags
//! override anything set here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// User settings for nf3
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Default install root (holds `downloads/` and `mods/`)
    #[serde(default)]
    pub default_root_dir: String,

    /// Parallel downloads (None = available parallelism)
    #[serde(default)]
    pub download_workers: Option<usize>,

    /// Parallel extractions (None = available parallelism)
    #[serde(default)]
    pub extract_workers: Option<usize>,

    /// Path to a curl-impersonate binary
    #[serde(default)]
    pub impersonate_bin: String,

    /// Path to a 7z/7zz binary
    #[serde(default)]
    pub seven_zip_bin: String,
}

impl Settings {
    /// Get the config directory path (~/.config/nf3)
    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("nf3");

        Ok(config_dir)
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.json"))
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path().and_then(|p| Self::load_from(&p)) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Could not load settings: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific file; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        Ok(settings)
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    fn non_empty(value: &str) -> Option<PathBuf> {
        (!value.trim().is_empty()).then(|| PathBuf::from(value.trim()))
    }

    pub fn impersonate_bin(&self) -> Option<PathBuf> {
        Self::non_empty(&self.impersonate_bin)
    }

    pub fn seven_zip_bin(&self) -> Option<PathBuf> {
        Self::non_empty(&self.seven_zip_bin)
    }

    pub fn default_root_dir(&self) -> Option<PathBuf> {
        Self::non_empty(&self.default_root_dir)
    }
}
