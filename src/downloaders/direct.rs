//! Direct archive links (forge archives, release assets, plain hosts).

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::file_host::remove_stale;
use super::http::{self, HttpClient};
use super::DownloadOutcome;
use crate::catalog::AddonRecord;
use crate::error::Result;
use crate::installer::progress::{UnitPhase, UnitReporter};

/// Streams the record's URL straight to disk.
///
/// There is no upstream hash for these sources, so every run re-fetches.
pub struct DirectFetcher {
    client: HttpClient,
}

impl DirectFetcher {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn fetch(
        &self,
        record: &AddonRecord,
        dest: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        remove_stale(dest).await?;

        let on_percent = |percent: f64| report(UnitPhase::Download, percent);
        let size = http::download_file(&self.client, &record.url, dest, &on_percent, cancel).await?;
        debug!("Fetched {} ({} bytes)", record.archive_file_name, size);

        Ok(DownloadOutcome::Fetched)
    }
}
