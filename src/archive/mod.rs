//! Archive extraction.
//!
//! All extraction goes through command-line tools: 7z for 7z and RAR (and
//! everything on Windows), Info-ZIP `unzip` or bsdtar for ZIP. The backend
//! is chosen from the archive's first byte and the host platform.
//!
//! # Commands
//!
//! - 7z: `7zz x -y -aoa -bsp2 -bso0 -scsUTF-8 -o<dir> archive`
//!   - `-bsp2`: progress percentages on stderr
//!   - `-aoa`: overwrite all existing files
//! - unzip: `unzip -o -q archive -d <dir>`
//! - tar: `tar -xf archive -C <dir>`

mod detect;
mod permissions;

pub use detect::{read_first_byte, select_backend, Backend, ContainerKind, Platform};
pub use permissions::fix_permissions_recursive;

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::installer::progress::PercentFn;
use crate::process::{self, RunError};
use crate::tools;

/// Dispatching extractor with discovered tool paths.
#[derive(Debug, Clone)]
pub struct Extractor {
    platform: Platform,
    seven_zip: Option<PathBuf>,
    unzip: Option<PathBuf>,
    tar: Option<PathBuf>,
}

impl Extractor {
    /// Discover tools for `platform`; `seven_zip` overrides 7z discovery.
    pub fn new(platform: Platform, seven_zip: Option<&Path>) -> Self {
        Self {
            platform,
            seven_zip: tools::find_tool(tools::SEVEN_ZIP_NAMES, seven_zip),
            unzip: tools::find_tool(tools::UNZIP_NAMES, None),
            tar: tools::find_tool(tools::TAR_NAMES, None),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Path of the tool a backend runs, if installed.
    pub fn tool(&self, backend: Backend) -> Option<&Path> {
        match backend {
            Backend::SevenZip => self.seven_zip.as_deref(),
            Backend::Unzip => self.unzip.as_deref(),
            Backend::Tar => self.tar.as_deref(),
        }
    }

    /// Extract `archive` into `dest`, then repair permissions under `dest`.
    pub async fn extract(
        &self,
        archive: &Path,
        dest: &Path,
        on_percent: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let first_byte = read_first_byte(archive)
            .await
            .map_err(|e| Error::extraction(archive, e))?;
        let backend = first_byte
            .and_then(|byte| select_backend(byte, self.platform))
            .ok_or_else(|| Error::UnsupportedArchive {
                path: archive.to_path_buf(),
            })?;

        let bin = self
            .tool(backend)
            .ok_or_else(|| Error::extraction(archive, format!("{:?} backend tool not found", backend)))?;

        tokio::fs::create_dir_all(dest).await?;
        debug!("Extracting {} with {:?}", archive.display(), backend);

        on_percent(0.0);
        let cmd = build_command(backend, bin, archive, dest);
        process::run_with_progress(cmd, &bin.display().to_string(), on_percent, cancel)
            .await
            .map_err(|e| match e {
                RunError::Cancelled => Error::Cancelled,
                RunError::Failed(message) => Error::extraction(archive, message),
            })?;

        let dir = dest.to_path_buf();
        tokio::task::spawn_blocking(move || fix_permissions_recursive(&dir))
            .await
            .map_err(|e| Error::extraction(archive, e))?
            .map_err(|e| Error::extraction(archive, format!("permission repair: {}", e)))?;

        on_percent(100.0);
        Ok(())
    }
}

fn build_command(backend: Backend, bin: &Path, archive: &Path, dest: &Path) -> Command {
    let mut cmd = Command::new(bin);
    match backend {
        Backend::SevenZip => {
            cmd.arg("x")
                .arg("-y")
                .arg("-aoa")
                .arg("-bsp2")
                .arg("-bso0")
                .arg("-scsUTF-8")
                .arg(format!("-o{}", dest.display()))
                .arg(archive);
        }
        Backend::Unzip => {
            cmd.arg("-o").arg("-q").arg(archive).arg("-d").arg(dest);
        }
        Backend::Tar => {
            cmd.arg("-xf").arg(archive).arg("-C").arg(dest);
        }
    }
    cmd
}
