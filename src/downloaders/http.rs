//! HTTP client with stall detection, progress and cancellation

use anyhow::{bail, Context};
use futures::StreamExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Stall detection: timeout if no progress for this duration.
///
/// File hosts can pause for short windows on congested links, keep this
/// lenient enough to avoid false "stalled" failures.
const STALL_TIMEOUT: Duration = Duration::from_secs(180);

/// Progress check interval
const PROGRESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// How often to invoke the progress callback (in milliseconds)
const CALLBACK_INTERVAL_MS: u128 = 250;

/// Connection attempts before giving up on a URL
const MAX_CONNECT_RETRIES: u32 = 3;

/// Base delay between connection retries
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read timeout: maximum time to wait for data between chunks
const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Browser identity used when no impersonating binary is available.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared HTTP client
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Client identifying as nf3, for plain archive hosts.
    pub fn new() -> anyhow::Result<Self> {
        Self::with_user_agent(concat!("nf3/", env!("CARGO_PKG_VERSION")))
    }

    /// Client with a browser User-Agent and cookie store, for hosts that
    /// reject non-browser clients.
    pub fn browser() -> anyhow::Result<Self> {
        Self::with_user_agent(BROWSER_USER_AGENT)
    }

    fn with_user_agent(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Shared progress state for stall detection
struct DownloadProgress {
    bytes_downloaded: AtomicU64,
    last_progress_time: std::sync::Mutex<Instant>,
}

impl DownloadProgress {
    fn new() -> Self {
        Self {
            bytes_downloaded: AtomicU64::new(0),
            last_progress_time: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn add_bytes(&self, count: u64) {
        self.bytes_downloaded.fetch_add(count, Ordering::Relaxed);
        if let Ok(mut last) = self.last_progress_time.lock() {
            *last = Instant::now();
        }
    }

    fn total_bytes(&self) -> u64 {
        self.bytes_downloaded.load(Ordering::Relaxed)
    }

    fn time_since_progress(&self) -> Duration {
        self.last_progress_time
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }
}

/// Send a GET, retrying connection failures with backoff.
async fn send_with_retry(client: &HttpClient, url: &str) -> anyhow::Result<reqwest::Response> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match client.inner().get(url).send().await {
            Ok(resp) => return Ok(resp),
            Err(e) if attempt < MAX_CONNECT_RETRIES => {
                let delay = RETRY_BASE_DELAY * (1 << (attempt - 1));
                warn!(
                    "Request failed for {} (attempt {}/{}), retrying in {}s: {}",
                    truncate_url(url),
                    attempt,
                    MAX_CONNECT_RETRIES,
                    delay.as_secs(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Connection failed: {}", truncate_url(url)))
            }
        }
    }
}

/// Fetch a page body as text.
pub async fn fetch_text(client: &HttpClient, url: &str, cancel: &CancellationToken) -> Result<String> {
    let fetch = async {
        let response = send_with_retry(client, url).await?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {}", status.as_u16());
        }
        response.text().await.context("Failed to read response body")
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fetch => result.map_err(|e| Error::transport(url, e)),
    }
}

/// Stream `url` into `output_path`, replacing any existing file.
///
/// `on_progress` receives a percentage when the server sends a
/// Content-Length. Returns the number of bytes written.
pub async fn download_file(
    client: &HttpClient,
    url: &str,
    output_path: &Path,
    on_progress: &(dyn Fn(f64) + Send + Sync),
    cancel: &CancellationToken,
) -> Result<u64> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = download_inner(client, url, output_path, on_progress) => {
            result.map_err(|e| Error::transport(url, e))
        }
    }
}

async fn download_inner(
    client: &HttpClient,
    url: &str,
    output_path: &Path,
    on_progress: &(dyn Fn(f64) + Send + Sync),
) -> anyhow::Result<u64> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = send_with_retry(client, url).await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("HTTP {} - {}", status.as_u16(), truncate_error(&body));
    }

    let content_length = response.content_length().filter(|len| *len > 0);

    let mut file = File::create(output_path)
        .await
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let progress = DownloadProgress::new();

    let stall_watch = async {
        loop {
            tokio::time::sleep(PROGRESS_CHECK_INTERVAL).await;
            let stall_time = progress.time_since_progress();
            if stall_time >= STALL_TIMEOUT {
                warn!("Download stalled - no progress for {:?}", stall_time);
                return anyhow::anyhow!("Stalled: no data for {}s", STALL_TIMEOUT.as_secs());
            }
            debug!("Downloaded: {} bytes", progress.total_bytes());
        }
    };

    let report = |downloaded: u64| {
        if let Some(total) = content_length {
            on_progress(downloaded as f64 / total as f64 * 100.0);
        }
    };

    let mut last_callback_time = Instant::now();
    let mut stream = response.bytes_stream();
    let body = async {
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.context("Failed to read chunk")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write chunk")?;
            progress.add_bytes(chunk.len() as u64);

            let now = Instant::now();
            if now.duration_since(last_callback_time).as_millis() >= CALLBACK_INTERVAL_MS {
                report(progress.total_bytes());
                last_callback_time = now;
            }
        }

        report(progress.total_bytes());
        file.flush().await.context("Failed to flush file")?;
        anyhow::Ok(progress.total_bytes())
    };

    let total_bytes = tokio::select! {
        result = body => result?,
        stalled = stall_watch => return Err(stalled),
    };

    if let Some(expected) = content_length {
        if total_bytes != expected {
            bail!(
                "Size mismatch: expected {} bytes, got {}",
                expected,
                total_bytes
            );
        }
    }

    Ok(total_bytes)
}

/// Truncate URL for error messages
pub(crate) fn truncate_url(url: &str) -> String {
    if url.chars().count() > 80 {
        format!("{}...", url.chars().take(77).collect::<String>())
    } else {
        url.to_string()
    }
}

/// Truncate error body for display
fn truncate_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 100 {
        format!("{}...", trimmed.chars().take(97).collect::<String>())
    } else if trimmed.is_empty() {
        "No details".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_http_client_creation() {
        assert!(HttpClient::new().is_ok());
        assert!(HttpClient::browser().is_ok());
    }

    #[test]
    fn test_truncate_url() {
        let long = format!("https://example.com/{}", "a".repeat(100));
        assert_eq!(truncate_url(&long).chars().count(), 80);
        assert_eq!(truncate_url("https://x.y/z"), "https://x.y/z");
    }

    #[tokio::test]
    async fn test_download_file_writes_and_reports() {
        let server = MockServer::start().await;
        let body = vec![42u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/pack.zip"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let out = dir.path().join("sub/pack.zip");
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: f64| seen.lock().unwrap().push(p);

        let client = HttpClient::new().unwrap();
        let url = format!("{}/pack.zip", server.uri());
        let written = download_file(&client, &url, &out, &on_progress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, body.len() as u64);
        assert_eq!(std::fs::read(&out).unwrap(), body);
        assert_eq!(seen.lock().unwrap().last(), Some(&100.0));
    }

    #[tokio::test]
    async fn test_download_file_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let dir = tempdir().unwrap();
        let client = HttpClient::new().unwrap();
        let url = format!("{}/missing.7z", server.uri());
        let err = download_file(
            &client,
            &url,
            &dir.path().join("missing.7z"),
            &|_| {},
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            Error::Transport { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_text_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = HttpClient::new().unwrap();
        let result = fetch_text(&client, "http://127.0.0.1:9/never", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
