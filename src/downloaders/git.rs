//! Repository sources: clone on first install, pull afterwards.
//!
//! git reports `Receiving objects:  45% (...)` on stderr when run with
//! `--progress`; those percentages drive the download phase.

use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::DownloadOutcome;
use crate::catalog::AddonRecord;
use crate::error::{Error, Result};
use crate::installer::progress::{UnitPhase, UnitReporter};
use crate::process::{self, RunError};

pub struct RepoCloner {
    git_bin: Option<PathBuf>,
}

impl RepoCloner {
    pub fn new(git_bin: Option<PathBuf>) -> Self {
        Self { git_bin }
    }

    /// Clone `record.url` into `dest`, or pull if `dest` is already a checkout.
    pub async fn fetch(
        &self,
        record: &AddonRecord,
        dest: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        let git = self
            .git_bin
            .as_ref()
            .ok_or_else(|| Error::transport(&record.url, "git not found"))?;

        let mut cmd = Command::new(git);
        if dest.join(".git").is_dir() {
            info!("Pulling {}", record.name);
            cmd.arg("-C").arg(dest).arg("pull").arg("--progress").arg("--ff-only");
        } else {
            info!("Cloning {}", record.name);
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            // A leftover non-repo directory would make clone refuse.
            if dest.exists() {
                tokio::fs::remove_dir_all(dest).await?;
            }
            cmd.arg("clone")
                .arg("--progress")
                .arg("--depth")
                .arg("1")
                .arg(&record.url)
                .arg(dest);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0");

        let on_percent = |percent: f64| report(UnitPhase::Download, percent);
        process::run_with_progress(cmd, "git", &on_percent, cancel)
            .await
            .map_err(|e| match e {
                RunError::Cancelled => Error::Cancelled,
                RunError::Failed(message) => Error::transport(&record.url, message),
            })?;

        report(UnitPhase::Download, 100.0);
        Ok(DownloadOutcome::Fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceKind;
    use crate::installer::progress::silent;
    use crate::tools;
    use tempfile::tempdir;

    fn record(url: String) -> AddonRecord {
        AddonRecord {
            index: 2,
            name: "Scripts".to_string(),
            url: url.clone(),
            mirror_catalog_url: None,
            md5: None,
            archive_file_name: "scripts".to_string(),
            patch: String::new(),
            instructions: Vec::new(),
            kind: SourceKind::RepoClone,
            nice_url: url,
        }
    }

    fn git(args: &[&str], dir: &Path) -> bool {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_missing_git_is_transport_error() {
        let cloner = RepoCloner::new(None);
        let dir = tempdir().unwrap();
        let err = cloner
            .fetch(
                &record("https://github.com/a/b.git".into()),
                &dir.path().join("b"),
                &silent(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn test_clone_then_pull_local_repo() {
        let Some(git_bin) = tools::find_tool(tools::GIT_NAMES, None) else {
            return;
        };

        let dir = tempdir().unwrap();
        let upstream = dir.path().join("upstream");
        std::fs::create_dir_all(upstream.join("gamedata")).unwrap();
        std::fs::write(upstream.join("gamedata/a.script"), "-- a").unwrap();
        let ok = git(&["init", "-q"], &upstream)
            && git(&["add", "."], &upstream)
            && git(
                &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "-q", "-m", "init"],
                &upstream,
            );
        if !ok {
            return;
        }

        let url = format!("file://{}", upstream.display());
        let dest = dir.path().join("downloads/scripts");
        let cloner = RepoCloner::new(Some(git_bin));
        let cancel = CancellationToken::new();

        cloner.fetch(&record(url.clone()), &dest, &silent(), &cancel).await.unwrap();
        assert!(dest.join("gamedata/a.script").exists());

        // Second run takes the pull path.
        let outcome = cloner.fetch(&record(url), &dest, &silent(), &cancel).await.unwrap();
        assert_eq!(outcome, DownloadOutcome::Fetched);
    }
}
