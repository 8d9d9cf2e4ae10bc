//! Download handlers for the three addon sources
//!
//! Mirror-selecting file host, direct archive links and git repositories.
//! `Strategies` routes each record to its handler by source kind.

mod direct;
mod file_host;
mod git;
mod http;
mod mirror;
mod transport;

pub use direct::DirectFetcher;
pub use file_host::{
    is_bad_mirror, parse_redirect_target, splice_mirror, FileHostFetcher, BAD_MIRROR_MAX_SIZE,
    MAX_MIRROR_RETRIES,
};
pub use git::RepoCloner;
pub use http::{download_file, fetch_text, HttpClient};
pub use mirror::{parse_mirror_ids, MirrorResolver};
pub use transport::{select_page_transport, BrowserTransport, CurlImpersonate, PageTransport};

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::catalog::{AddonRecord, SourceKind};
use crate::error::Result;
use crate::installer::config::InstallConfig;
use crate::installer::progress::UnitReporter;
use crate::tools;

/// Result of fetching one archive group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Local archive already matched its hash; no network I/O
    Unchanged,
    /// New bytes were written
    Fetched,
    /// Retries exhausted or unrecoverable transport error
    Failed,
}

impl DownloadOutcome {
    /// Whether extraction may proceed.
    pub fn is_ready(&self) -> bool {
        matches!(self, DownloadOutcome::Unchanged | DownloadOutcome::Fetched)
    }
}

/// Per-run fetch strategy table.
pub struct Strategies {
    file_host: FileHostFetcher,
    direct: DirectFetcher,
    repo: RepoCloner,
}

impl Strategies {
    pub fn new(file_host: FileHostFetcher, direct: DirectFetcher, repo: RepoCloner) -> Self {
        Self {
            file_host,
            direct,
            repo,
        }
    }

    /// Build the table for one run: discovers tools and starts an empty
    /// mirror cache.
    pub fn from_config(config: &InstallConfig) -> anyhow::Result<Self> {
        let transport = select_page_transport(config.impersonate_bin.as_deref())?;
        let mirrors = Arc::new(MirrorResolver::new(Arc::clone(&transport)));

        Ok(Self::new(
            FileHostFetcher::new(transport, mirrors),
            DirectFetcher::new(HttpClient::new()?),
            RepoCloner::new(tools::find_tool(tools::GIT_NAMES, None)),
        ))
    }

    /// Fetch `record`'s archive into `dest` with the strategy for its kind.
    pub async fn fetch(
        &self,
        record: &AddonRecord,
        dest: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        match record.kind {
            SourceKind::FileHost => self.file_host.fetch(record, dest, report, cancel).await,
            SourceKind::DirectArchive => self.direct.fetch(record, dest, report, cancel).await,
            SourceKind::RepoClone => self.repo.fetch(record, dest, report, cancel).await,
        }
    }
}
