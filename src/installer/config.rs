//! Installation configuration
//!
//! Defines the configuration structure for an install/update run.

use std::path::PathBuf;

use crate::archive::Platform;

/// Configuration for an install run
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Path to the tab-delimited addon catalog
    pub catalog_path: PathBuf,

    /// Install root; archives go to `downloads/`, addons to `mods/`
    pub root_dir: PathBuf,

    /// Maximum concurrent downloads
    pub download_workers: usize,

    /// Maximum concurrent extractions
    pub extract_workers: usize,

    /// Host platform, drives archive backend selection
    pub platform: Platform,

    /// Explicit curl-impersonate binary (otherwise discovered on PATH)
    pub impersonate_bin: Option<PathBuf>,

    /// Explicit 7z binary (otherwise discovered)
    pub seven_zip_bin: Option<PathBuf>,
}

impl InstallConfig {
    /// Config with defaults: one worker per CPU thread, host platform.
    pub fn new(catalog_path: PathBuf, root_dir: PathBuf) -> Self {
        let thread_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            catalog_path,
            root_dir,
            download_workers: thread_count,
            extract_workers: thread_count,
            platform: Platform::current(),
            impersonate_bin: None,
            seven_zip_bin: None,
        }
    }

    /// Directory for fetched archives and repository checkouts
    pub fn downloads_dir(&self) -> PathBuf {
        self.root_dir.join("downloads")
    }

    /// Directory holding one folder per installed addon
    pub fn mods_dir(&self) -> PathBuf {
        self.root_dir.join("mods")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.catalog_path.is_file() {
            return Err(ConfigError::CatalogNotFound(self.catalog_path.clone()));
        }

        if self.root_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingRoot);
        }

        if self.download_workers == 0 || self.extract_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        if let Some(bin) = &self.impersonate_bin {
            if !bin.exists() {
                return Err(ConfigError::ToolNotFound(bin.clone()));
            }
        }

        if let Some(bin) = &self.seven_zip_bin {
            if !bin.exists() {
                return Err(ConfigError::ToolNotFound(bin.clone()));
            }
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Catalog file not found: {0}")]
    CatalogNotFound(PathBuf),

    #[error("Install root directory is required")]
    MissingRoot,

    #[error("Worker counts must be at least 1")]
    ZeroWorkers,

    #[error("Configured tool not found: {0}")]
    ToolNotFound(PathBuf),
}
