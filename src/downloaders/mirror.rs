//! Mirror selection for the file host.
//!
//! Every file-host download has an `/all` page listing the mirrors that
//! carry it. The list is fetched once per run and cached; callers then get
//! a random mirror that is not in their exclusion set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use rand::seq::IndexedRandom;
use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::transport::PageTransport;
use crate::error::{Error, Result};

fn mirror_href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/downloads/mirror/\d+/(\d+)").expect("valid mirror regex"))
}

/// Extract mirror ids from the anchors of a mirror listing page.
///
/// Ids keep page order; duplicates are dropped.
pub fn parse_mirror_ids(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for anchor in document.select(&selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(caps) = mirror_href_regex().captures(href) {
            let id = caps[1].to_string();
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Per-run mirror cache.
pub struct MirrorResolver {
    transport: Arc<dyn PageTransport>,
    cache: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl MirrorResolver {
    pub fn new(transport: Arc<dyn PageTransport>) -> Self {
        Self {
            transport,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Pick a mirror for `catalog_url` uniformly among those not in `exclude`.
    pub async fn resolve(
        &self,
        catalog_url: &str,
        exclude: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mirrors = self.mirrors(catalog_url, cancel).await?;
        let candidates: Vec<&String> = mirrors.iter().filter(|m| !exclude.contains(*m)).collect();

        candidates
            .choose(&mut rand::rng())
            .map(|m| (*m).clone())
            .ok_or_else(|| Error::NoMirrorsAvailable {
                catalog_url: catalog_url.to_string(),
            })
    }

    /// Drop the cached set so the next resolve refetches the listing.
    pub async fn invalidate(&self, catalog_url: &str) {
        if self.cache.lock().await.remove(catalog_url).is_some() {
            info!("Invalidated mirror list for {}", catalog_url);
        }
    }

    /// Cached mirror set, populating it on first use.
    ///
    /// The lock is held across the page fetch so concurrent callers for the
    /// same listing wait for one population instead of each fetching it.
    async fn mirrors(&self, catalog_url: &str, cancel: &CancellationToken) -> Result<Arc<Vec<String>>> {
        let mut cache = self.cache.lock().await;
        if let Some(set) = cache.get(catalog_url) {
            return Ok(Arc::clone(set));
        }

        debug!("Fetching mirror list: {}", catalog_url);
        let html = self.transport.fetch_page(catalog_url, cancel).await?;
        let ids = parse_mirror_ids(&html);
        if ids.is_empty() {
            return Err(Error::NoMirrorsAvailable {
                catalog_url: catalog_url.to_string(),
            });
        }

        debug!("{} mirrors for {}", ids.len(), catalog_url);
        let set = Arc::new(ids);
        cache.insert(catalog_url.to_string(), Arc::clone(&set));
        Ok(set)
    }
}
