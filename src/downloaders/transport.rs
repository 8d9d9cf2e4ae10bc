//! HTTP-impersonating transport for the mirror file host.
//!
//! The file host fronts its pages with bot checks that reject ordinary TLS
//! stacks. A curl-impersonate binary reproduces a browser's TLS and header
//! fingerprint; when none is installed we fall back to reqwest with a browser
//! User-Agent, which works for some mirrors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::http::{self, HttpClient};
use crate::error::{Error, Result};
use crate::installer::progress::PercentFn;
use crate::process::{self, RunError};
use crate::tools;

/// Fetches pages and files the way a browser would.
#[async_trait]
pub trait PageTransport: Send + Sync {
    /// Fetch a page body as text.
    async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> Result<String>;

    /// Stream `url` to `dest`, returning the number of bytes on disk.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_percent: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64>;
}

/// curl-impersonate wrapper script (`curl_chrome116` and friends).
pub struct CurlImpersonate {
    bin: PathBuf,
}

impl CurlImpersonate {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("--location").arg("--max-redirs").arg("10");
        cmd
    }
}

fn map_run_error(url: &str, err: RunError) -> Error {
    match err {
        RunError::Cancelled => Error::Cancelled,
        RunError::Failed(message) => Error::transport(url, message),
    }
}

#[async_trait]
impl PageTransport for CurlImpersonate {
    async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        debug!("Fetching page via {}: {}", self.bin.display(), url);
        let mut cmd = self.command();
        cmd.arg("--silent").arg("--show-error").arg(url);

        process::capture_stdout(cmd, "curl-impersonate", cancel)
            .await
            .map_err(|e| map_run_error(url, e))
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_percent: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // No --fail: mirror error pages must land on disk so the caller can
        // recognise them.
        let mut cmd = self.command();
        cmd.arg("--progress-bar").arg("--output").arg(dest).arg(url);

        process::run_with_progress(cmd, "curl-impersonate", on_percent, cancel)
            .await
            .map_err(|e| map_run_error(url, e))?;

        Ok(tokio::fs::metadata(dest).await?.len())
    }
}

/// reqwest client posing as a browser.
pub struct BrowserTransport {
    client: HttpClient,
}

impl BrowserTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            client: HttpClient::browser()?,
        })
    }
}

#[async_trait]
impl PageTransport for BrowserTransport {
    async fn fetch_page(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        http::fetch_text(&self.client, url, cancel).await
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        on_percent: &PercentFn<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        http::download_file(&self.client, url, dest, on_percent, cancel).await
    }
}

/// Pick the best available transport for the file host.
pub fn select_page_transport(explicit: Option<&Path>) -> anyhow::Result<Arc<dyn PageTransport>> {
    match tools::find_tool(tools::IMPERSONATE_NAMES, explicit) {
        Some(bin) => {
            info!("Using {} for file host downloads", bin.display());
            Ok(Arc::new(CurlImpersonate::new(bin)))
        }
        None => {
            info!("No curl-impersonate binary found, using built-in HTTP client for file host");
            Ok(Arc::new(BrowserTransport::new()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_select_falls_back_to_browser() {
        // A missing explicit binary still yields a usable transport.
        assert!(select_page_transport(Some(Path::new("/nonexistent/curl_chrome116"))).is_ok());
    }

    #[tokio::test]
    async fn test_browser_transport_fetch_and_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file.7z"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 2048]))
            .mount(&server)
            .await;

        let transport = BrowserTransport::new().unwrap();
        let cancel = CancellationToken::new();

        let page = transport
            .fetch_page(&format!("{}/page", server.uri()), &cancel)
            .await
            .unwrap();
        assert_eq!(page, "<html>ok</html>");

        let dir = tempdir().unwrap();
        let dest = dir.path().join("file.7z");
        let size = transport
            .download(&format!("{}/file.7z", server.uri()), &dest, &|_| {}, &cancel)
            .await
            .unwrap();
        assert_eq!(size, 2048);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_curl_impersonate_failure_is_transport_error() {
        // `false` stands in for a curl binary that exits non-zero.
        let Some(bin) = tools::find_tool(&["false"], None) else {
            return;
        };
        let transport = CurlImpersonate::new(bin);
        let err = transport
            .fetch_page("https://example.invalid/", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }
}
