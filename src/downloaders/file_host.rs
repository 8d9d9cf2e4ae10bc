//! Mirror-selecting file host downloader (ModDB).
//!
//! A download page embeds a client-side redirect to
//! `/downloads/mirror/<file>/<mirror>/<token>`. We pick our own mirror from
//! the cached listing, splice it into that link and download through the
//! impersonating transport. Mirrors that answer with a small HTML error page
//! instead of the archive are excluded and another one is tried.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::mirror::MirrorResolver;
use super::transport::PageTransport;
use super::DownloadOutcome;
use crate::catalog::AddonRecord;
use crate::error::{Error, Result};
use crate::installer::progress::{UnitPhase, UnitReporter};

/// Retries after the first attempt before giving up on a download.
pub const MAX_MIRROR_RETRIES: u32 = 3;

/// Files at least this large are never treated as mirror error pages.
pub const BAD_MIRROR_MAX_SIZE: u64 = 10 * 1024;

/// Lowercase phrases found in the file host's mirror error pages.
const BAD_MIRROR_PHRASES: &[&str] = &[
    "mirror",
    "unavailable",
    "not available",
    "forbidden",
    "too many requests",
];

fn redirect_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"window\.location\.href\s*=\s*["']([^"']+)["']"#).expect("valid redirect regex")
    })
}

fn mirror_segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(/downloads/mirror/\d+/)(\d+)(/)").expect("valid mirror regex"))
}

/// Find the client-side redirect on a download page, resolved against `page_url`.
pub fn parse_redirect_target(html: &str, page_url: &str) -> Option<String> {
    let target = redirect_regex().captures(html)?.get(1)?.as_str();

    match reqwest::Url::parse(page_url) {
        Ok(base) => base.join(target).ok().map(String::from),
        Err(_) if target.starts_with("http") => Some(target.to_string()),
        Err(_) => None,
    }
}

/// Replace the mirror id in a mirror link. `None` if `link` has no mirror segment.
pub fn splice_mirror(link: &str, mirror: &str) -> Option<String> {
    let re = mirror_segment_regex();
    if !re.is_match(link) {
        return None;
    }
    Some(re.replacen(link, 1, format!("${{1}}{}${{3}}", mirror)).into_owned())
}

/// True when `path` holds a mirror error page rather than an archive.
///
/// Heuristic: under 10 KiB, starts with `<`, and mentions a known error
/// phrase. A genuine archive that small and starting with `<` would be
/// misread, which no supported container format does.
pub async fn is_bad_mirror(path: &Path) -> Result<bool> {
    let size = tokio::fs::metadata(path).await?.len();
    if size >= BAD_MIRROR_MAX_SIZE {
        return Ok(false);
    }

    let mut body = Vec::with_capacity(size as usize);
    tokio::fs::File::open(path).await?.read_to_end(&mut body).await?;

    if body.first() != Some(&b'<') {
        return Ok(false);
    }
    let text = String::from_utf8_lossy(&body).to_lowercase();
    Ok(BAD_MIRROR_PHRASES.iter().any(|phrase| text.contains(phrase)))
}

/// Hash `path` off the async runtime, reporting CheckHash progress.
pub(crate) async fn hash_matches(path: &Path, expected: &str, report: &UnitReporter) -> Result<bool> {
    let owned = path.to_path_buf();
    let expected = expected.to_string();
    let report = Arc::clone(report);

    tokio::task::spawn_blocking(move || {
        let on_progress = |done: u64, total: u64| {
            if total > 0 {
                report(UnitPhase::CheckHash, done as f64 / total as f64 * 100.0);
            }
        };
        crate::hash::matches_md5(&owned, &expected, Some(&on_progress))
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?
    .map_err(|e| Error::transport(&path.display().to_string(), e))
}

pub(crate) async fn remove_stale(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!("Removed stale {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// File host fetch strategy.
pub struct FileHostFetcher {
    transport: Arc<dyn PageTransport>,
    mirrors: Arc<MirrorResolver>,
}

impl FileHostFetcher {
    pub fn new(transport: Arc<dyn PageTransport>, mirrors: Arc<MirrorResolver>) -> Self {
        Self { transport, mirrors }
    }

    pub async fn fetch(
        &self,
        record: &AddonRecord,
        dest: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<DownloadOutcome> {
        if let Some(expected) = &record.md5 {
            if hash_matches(dest, expected, report).await? {
                info!("{} is up to date", record.archive_file_name);
                return Ok(DownloadOutcome::Unchanged);
            }
        }

        let catalog_url = record
            .mirror_catalog_url
            .as_deref()
            .ok_or_else(|| Error::transport(&record.url, "record has no mirror listing"))?;

        let mut exclude: HashSet<String> = HashSet::new();
        let mut invalidated = false;
        let mut retries = 0u32;

        loop {
            let mirror = match self.mirrors.resolve(catalog_url, &exclude, cancel).await {
                Ok(mirror) => mirror,
                Err(Error::NoMirrorsAvailable { .. }) if !exclude.is_empty() => {
                    // Refresh the listing once; after that the retry budget alone
                    // bounds how often known mirrors are tried again.
                    if invalidated {
                        debug!("Retrying known mirrors for {}", record.name);
                    } else {
                        warn!("All known mirrors failed for {}, refreshing list", record.name);
                        self.mirrors.invalidate(catalog_url).await;
                        invalidated = true;
                    }
                    exclude.clear();
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.attempt(record, &mirror, dest, report, cancel).await {
                Ok(()) => break,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(
                        "Mirror {} failed for {} (retry {}/{}): {}",
                        mirror, record.archive_file_name, retries, MAX_MIRROR_RETRIES, e
                    );
                    exclude.insert(mirror);
                }
            }

            if retries == MAX_MIRROR_RETRIES {
                remove_stale(dest).await?;
                return Err(Error::ExhaustedMirrors {
                    url: record.url.clone(),
                    retries: MAX_MIRROR_RETRIES,
                });
            }
            retries += 1;
        }

        if let Some(expected) = &record.md5 {
            if !hash_matches(dest, expected, report).await? {
                return Err(Error::transport(
                    &record.url,
                    format!("hash mismatch for {}", record.archive_file_name),
                ));
            }
        }

        Ok(DownloadOutcome::Fetched)
    }

    /// One download through `mirror`. A bad-mirror page is an error.
    async fn attempt(
        &self,
        record: &AddonRecord,
        mirror: &str,
        dest: &Path,
        report: &UnitReporter,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let page = self.transport.fetch_page(&record.url, cancel).await?;
        let target = parse_redirect_target(&page, &record.url)
            .ok_or_else(|| Error::transport(&record.url, "download page has no redirect"))?;
        let link = splice_mirror(&target, mirror)
            .ok_or_else(|| Error::transport(&target, "redirect is not a mirror link"))?;

        debug!("Downloading {} via mirror {}", record.archive_file_name, mirror);
        remove_stale(dest).await?;
        let on_percent = |percent: f64| report(UnitPhase::Download, percent);
        self.transport.download(&link, dest, &on_percent, cancel).await?;

        if is_bad_mirror(dest).await? {
            return Err(Error::transport(&link, "mirror returned an error page"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::progress::{silent, PercentFn};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    const START_URL: &str = "https://www.moddb.com/downloads/start/195117";
    const LISTING_URL: &str = "https://www.moddb.com/downloads/start/195117/all";

    const LISTING: &str = r#"
        <a href="/downloads/mirror/195117/100/aaa">A</a>
        <a href="/downloads/mirror/195117/101/bbb">B</a>
        <a href="/downloads/mirror/195117/102/ccc">C</a>
    "#;

    const START_PAGE: &str =
        r#"<script>window.location.href = "/downloads/mirror/195117/100/tok123";</script>"#;

    const ERROR_PAGE: &[u8] = b"<html><body>Mirror unavailable, try another</body></html>";

    fn good_archive() -> Vec<u8> {
        let mut bytes = vec![0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C];
        bytes.extend(std::iter::repeat(9u8).take(32 * 1024));
        bytes
    }

    /// Serves fixed pages; downloads write `bodies[n]` (last one repeats).
    struct FakeHost {
        listing: String,
        bodies: Vec<Vec<u8>>,
        page_fetches: AtomicUsize,
        listing_fetches: AtomicUsize,
        downloads: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn new(bodies: Vec<Vec<u8>>) -> Arc<Self> {
            Self::with_listing(LISTING, bodies)
        }

        fn with_listing(listing: &str, bodies: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                listing: listing.to_string(),
                bodies,
                page_fetches: AtomicUsize::new(0),
                listing_fetches: AtomicUsize::new(0),
                downloads: Mutex::new(Vec::new()),
            })
        }

        fn network_calls(&self) -> usize {
            self.page_fetches.load(Ordering::SeqCst)
                + self.listing_fetches.load(Ordering::SeqCst)
                + self.downloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageTransport for FakeHost {
        async fn fetch_page(&self, url: &str, _cancel: &CancellationToken) -> Result<String> {
            if url == LISTING_URL {
                self.listing_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(self.listing.clone())
            } else {
                self.page_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(START_PAGE.to_string())
            }
        }

        async fn download(
            &self,
            url: &str,
            dest: &Path,
            on_percent: &PercentFn<'_>,
            _cancel: &CancellationToken,
        ) -> Result<u64> {
            let n = {
                let mut downloads = self.downloads.lock().unwrap();
                downloads.push(url.to_string());
                downloads.len() - 1
            };
            let body = &self.bodies[n.min(self.bodies.len() - 1)];
            tokio::fs::write(dest, body).await?;
            on_percent(100.0);
            Ok(body.len() as u64)
        }
    }

    fn record(md5: Option<String>) -> AddonRecord {
        AddonRecord {
            index: 1,
            name: "Weather Overhaul".to_string(),
            url: START_URL.to_string(),
            mirror_catalog_url: Some(LISTING_URL.to_string()),
            md5,
            archive_file_name: "weather.7z".to_string(),
            patch: String::new(),
            instructions: Vec::new(),
            kind: crate::catalog::SourceKind::FileHost,
            nice_url: START_URL.to_string(),
        }
    }

    fn fetcher(host: &Arc<FakeHost>) -> FileHostFetcher {
        let mirrors = Arc::new(MirrorResolver::new(host.clone()));
        FileHostFetcher::new(host.clone(), mirrors)
    }

    fn mirror_of(link: &str) -> String {
        mirror_segment_regex().captures(link).unwrap()[2].to_string()
    }

    #[test]
    fn test_parse_redirect_target() {
        assert_eq!(
            parse_redirect_target(START_PAGE, START_URL).as_deref(),
            Some("https://www.moddb.com/downloads/mirror/195117/100/tok123")
        );
        let absolute = "<script>window.location.href='https://cdn.example.com/x.zip';</script>";
        assert_eq!(
            parse_redirect_target(absolute, START_URL).as_deref(),
            Some("https://cdn.example.com/x.zip")
        );
        assert_eq!(parse_redirect_target("<html></html>", START_URL), None);
    }

    #[test]
    fn test_splice_mirror() {
        assert_eq!(
            splice_mirror("https://www.moddb.com/downloads/mirror/195117/100/tok123", "777").as_deref(),
            Some("https://www.moddb.com/downloads/mirror/195117/777/tok123")
        );
        assert_eq!(splice_mirror("https://example.com/file.zip", "777"), None);
    }

    #[tokio::test]
    async fn test_is_bad_mirror() {
        let dir = tempdir().unwrap();

        let page = dir.path().join("page.7z");
        std::fs::write(&page, ERROR_PAGE).unwrap();
        assert!(is_bad_mirror(&page).await.unwrap());

        let tiny_archive = dir.path().join("tiny.zip");
        std::fs::write(&tiny_archive, b"PK\x03\x04 mirror").unwrap();
        assert!(!is_bad_mirror(&tiny_archive).await.unwrap());

        let big_html = dir.path().join("big.7z");
        let mut body = b"<html>mirror".to_vec();
        body.resize(BAD_MIRROR_MAX_SIZE as usize, b' ');
        std::fs::write(&big_html, body).unwrap();
        assert!(!is_bad_mirror(&big_html).await.unwrap());
    }

    #[tokio::test]
    async fn test_always_bad_mirror_makes_exactly_four_attempts() {
        let host = FakeHost::new(vec![ERROR_PAGE.to_vec()]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather.7z");

        let err = fetcher(&host)
            .fetch(&record(None), &dest, &silent(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::ExhaustedMirrors { retries, .. } => assert_eq!(retries, MAX_MIRROR_RETRIES),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(host.downloads.lock().unwrap().len(), 1 + MAX_MIRROR_RETRIES as usize);
        // Three mirrors known: the fourth attempt needed one list refresh.
        assert_eq!(host.listing_fetches.load(Ordering::SeqCst), 2);
        assert!(!dest.exists());
    }

    async fn exhaust(listing: &str) -> (Error, Arc<FakeHost>) {
        let host = FakeHost::with_listing(listing, vec![ERROR_PAGE.to_vec()]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather.7z");

        let err = fetcher(&host)
            .fetch(&record(None), &dest, &silent(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!dest.exists());
        (err, host)
    }

    #[tokio::test]
    async fn test_single_bad_mirror_still_gets_every_retry() {
        let (err, host) = exhaust(r#"<a href="/downloads/mirror/195117/100/aaa">A</a>"#).await;

        assert!(matches!(err, Error::ExhaustedMirrors { retries: MAX_MIRROR_RETRIES, .. }));
        let downloads = host.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1 + MAX_MIRROR_RETRIES as usize);
        assert!(downloads.iter().all(|link| mirror_of(link) == "100"));
        assert_eq!(host.listing_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_two_bad_mirrors_still_get_every_retry() {
        let listing = r#"
            <a href="/downloads/mirror/195117/100/aaa">A</a>
            <a href="/downloads/mirror/195117/101/bbb">B</a>
        "#;
        let (err, host) = exhaust(listing).await;

        assert!(matches!(err, Error::ExhaustedMirrors { retries: MAX_MIRROR_RETRIES, .. }));
        let downloads = host.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 1 + MAX_MIRROR_RETRIES as usize);
        assert_ne!(mirror_of(&downloads[0]), mirror_of(&downloads[1]));
        assert_eq!(host.listing_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_bad_mirror_is_excluded_on_retry() {
        let good = good_archive();
        let host = FakeHost::new(vec![ERROR_PAGE.to_vec(), good.clone()]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather.7z");
        let expected = format!("{:x}", md5::compute(&good));

        let outcome = fetcher(&host)
            .fetch(&record(Some(expected)), &dest, &silent(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Fetched);
        assert_eq!(std::fs::read(&dest).unwrap(), good);
        let downloads = host.downloads.lock().unwrap();
        assert_eq!(downloads.len(), 2);
        assert_ne!(mirror_of(&downloads[0]), mirror_of(&downloads[1]));
    }

    #[tokio::test]
    async fn test_matching_hash_skips_network() {
        let good = good_archive();
        let host = FakeHost::new(vec![good.clone()]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather.7z");
        std::fs::write(&dest, &good).unwrap();
        let expected = format!("{:x}", md5::compute(&good));

        let outcome = fetcher(&host)
            .fetch(&record(Some(expected)), &dest, &silent(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, DownloadOutcome::Unchanged);
        assert_eq!(host.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_hash_mismatch_after_download() {
        let host = FakeHost::new(vec![good_archive()]);
        let dir = tempdir().unwrap();
        let dest = dir.path().join("weather.7z");

        let err = fetcher(&host)
            .fetch(
                &record(Some("0".repeat(32))),
                &dest,
                &silent(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transport { .. }));
    }
}
