//! Error kinds raised by the acquisition pipeline.
//!
//! Each stage maps its failures into one of these variants at its module
//! boundary. Glue code below that boundary (HTTP helpers, tool discovery)
//! works with `anyhow` and is flattened into a message here.

use std::path::PathBuf;

use crate::installer::config::ConfigError;

/// Pipeline error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Catalog line {line}: {reason}")]
    Classification { line: usize, reason: String },

    #[error("No mirrors available for {catalog_url}")]
    NoMirrorsAvailable { catalog_url: String },

    #[error("All mirror attempts failed for {url} after {retries} retries")]
    ExhaustedMirrors { url: String, retries: u32 },

    #[error("Transport failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("Unsupported archive format: {}", path.display())]
    UnsupportedArchive { path: PathBuf },

    #[error("Extraction of {} failed: {message}", archive.display())]
    Extraction { archive: PathBuf, message: String },

    #[error("Normalization of {} failed: {message}", dir.display())]
    Normalization { dir: PathBuf, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a transport error from any displayable cause, keeping the full chain.
    pub fn transport(url: &str, cause: impl std::fmt::Display) -> Self {
        Error::Transport {
            url: url.to_string(),
            message: format!("{:#}", cause),
        }
    }

    pub fn extraction(archive: &std::path::Path, cause: impl std::fmt::Display) -> Self {
        Error::Extraction {
            archive: archive.to_path_buf(),
            message: format!("{:#}", cause),
        }
    }

    pub fn normalization(dir: &std::path::Path, cause: impl std::fmt::Display) -> Self {
        Error::Normalization {
            dir: dir.to_path_buf(),
            message: format!("{:#}", cause),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
