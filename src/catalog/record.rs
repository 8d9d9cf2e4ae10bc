//! Catalog row classification.
//!
//! A catalog is a tab-delimited text file, one addon per line:
//!
//! ```text
//! url <TAB> instructions <TAB> patch <TAB> name <TAB> nice_url <TAB> archive <TAB> md5
//! ```
//!
//! A line holding only the first column is a separator: a visual marker for the
//! mod manager, not something we download.

use std::io::BufRead;
use std::path::{Component, Path};

use tracing::debug;

use crate::error::{Error, Result};
use crate::paths;

/// Extensions that identify a direct archive link on generic hosts.
const ARCHIVE_EXTENSIONS: &[&str] = &[".zip", ".7z", ".rar"];

/// Where an addon's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Mirror-selecting file host (ModDB)
    FileHost,
    /// Plain archive link (GitHub/GitLab archives, release assets)
    DirectArchive,
    /// Version-controlled repository, cloned or pulled
    RepoClone,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::FileHost => "file-host",
            SourceKind::DirectArchive => "direct",
            SourceKind::RepoClone => "repo",
        }
    }
}

/// One downloadable catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonRecord {
    /// Position in the catalog (1-based, separators included)
    pub index: usize,
    pub name: String,
    pub url: String,
    /// Page listing the file host's mirrors for this download
    pub mirror_catalog_url: Option<String>,
    /// Lowercase hex MD5 of the final archive
    pub md5: Option<String>,
    pub archive_file_name: String,
    /// Suffix appended to the install folder name
    pub patch: String,
    /// Relative paths to hoist into the extraction root, in order
    pub instructions: Vec<String>,
    pub kind: SourceKind,
    /// Human-facing page written into the addon's metadata
    pub nice_url: String,
}

impl AddonRecord {
    /// Install folder name under `mods/`.
    pub fn folder_name(&self) -> String {
        format!("{}- {}{}", self.index, self.name, self.patch)
    }

    /// Nominal version string: the archive name without its extension.
    pub fn version(&self) -> &str {
        match self.archive_file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => &self.archive_file_name,
        }
    }
}

/// A classified catalog line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEntry {
    Addon(AddonRecord),
    Separator { index: usize, name: String },
}

impl CatalogEntry {
    pub fn index(&self) -> usize {
        match self {
            CatalogEntry::Addon(record) => record.index,
            CatalogEntry::Separator { index, .. } => *index,
        }
    }
}

/// Work out the source kind from a URL, or `None` if no marker matches.
pub fn detect_source(url: &str) -> Option<SourceKind> {
    let lower = url.trim().to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        return None;
    }

    if lower.contains("moddb.com") {
        return Some(SourceKind::FileHost);
    }

    let path = lower.split(['?', '#']).next().unwrap_or(&lower);
    if path.ends_with(".git") {
        return Some(SourceKind::RepoClone);
    }

    let forge = lower.contains("github.com") || lower.contains("gitlab.com");
    if forge && (path.contains("/archive/") || path.contains("/releases/download/")) {
        return Some(SourceKind::DirectArchive);
    }
    if ARCHIVE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return Some(SourceKind::DirectArchive);
    }
    if forge {
        return Some(SourceKind::RepoClone);
    }

    None
}

/// Split the instruction column into relative paths.
///
/// `0` and empty mean "no instructions".
pub fn parse_instructions(column: &str) -> Vec<String> {
    let column = column.trim();
    if column.is_empty() || column == "0" {
        return Vec::new();
    }

    column
        .split(':')
        .map(|p| paths::to_linux_path(p.trim()).trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Mirror listing page for a file-host download page.
fn mirror_catalog_for(url: &str) -> String {
    let base = url.trim().trim_end_matches('/');
    if base.ends_with("/all") {
        base.to_string()
    } else {
        format!("{}/all", base)
    }
}

/// Repository name from a clone URL (`.../owner/repo.git` -> `repo`).
fn repo_name(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// True when `name` is exactly one normal path component, so joining it onto
/// `downloads/` cannot leave that directory.
fn is_plain_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Classify one catalog line.
///
/// `line_no` is only used for error messages; `index` is the catalog position
/// given to the resulting entry.
pub fn classify(line: &str, line_no: usize, index: usize) -> Result<CatalogEntry> {
    let columns: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();

    if columns.len() == 1 {
        return Ok(CatalogEntry::Separator {
            index,
            name: columns[0].trim().to_string(),
        });
    }

    let field = |i: usize| -> Option<&str> {
        columns.get(i).map(|c| c.trim()).filter(|c| !c.is_empty())
    };
    let fail = |reason: String| Error::Classification { line: line_no, reason };

    let url = field(0).ok_or_else(|| fail("missing source URL".to_string()))?;
    let kind = detect_source(url).ok_or_else(|| fail(format!("unrecognized source: {}", url)))?;

    let name = field(3)
        .ok_or_else(|| fail(format!("{} row has no display name", kind.name())))?
        .to_string();

    // The patch token keeps its leading whitespace: it is glued onto the folder name.
    let patch = columns
        .get(2)
        .map(|c| c.trim_end().to_string())
        .filter(|c| !c.trim().is_empty() && c.trim() != "0");
    if kind == SourceKind::FileHost && patch.is_none() {
        return Err(fail("file-host row has no patch token".to_string()));
    }

    let archive_file_name = match (field(5), kind) {
        (Some(archive), _) => archive.to_string(),
        (None, SourceKind::RepoClone) => repo_name(url)
            .ok_or_else(|| fail(format!("cannot derive repository name from {}", url)))?,
        (None, _) => {
            return Err(fail(format!("{} row has no archive name", kind.name())));
        }
    };
    if !is_plain_file_name(&archive_file_name) {
        return Err(fail(format!(
            "archive name '{}' must be a plain file name",
            archive_file_name
        )));
    }

    let record = AddonRecord {
        index,
        name,
        url: url.to_string(),
        mirror_catalog_url: (kind == SourceKind::FileHost).then(|| mirror_catalog_for(url)),
        md5: field(6).map(|h| h.to_ascii_lowercase()),
        archive_file_name,
        patch: patch.unwrap_or_default(),
        instructions: columns.get(1).map(|c| parse_instructions(c)).unwrap_or_default(),
        kind,
        nice_url: field(4).unwrap_or(url).to_string(),
    };

    debug!(
        "Classified line {} as {} addon '{}'",
        line_no,
        kind.name(),
        record.name
    );
    Ok(CatalogEntry::Addon(record))
}

/// Parse a whole catalog. Blank lines are skipped and do not consume an index.
pub fn parse_catalog(text: &str) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    let mut index = 0;

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        index += 1;
        entries.push(classify(line, i + 1, index)?);
    }

    Ok(entries)
}

/// Parse a catalog from any buffered reader.
pub fn parse_catalog_reader<R: BufRead>(reader: R) -> Result<Vec<CatalogEntry>> {
    let mut entries = Vec::new();
    let mut index = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        index += 1;
        entries.push(classify(&line, i + 1, index)?);
    }

    Ok(entries)
}

/// Drop separators, keeping downloadable records in catalog order.
pub fn addons(entries: Vec<CatalogEntry>) -> Vec<AddonRecord> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            CatalogEntry::Addon(record) => Some(record),
            CatalogEntry::Separator { .. } => None,
        })
        .collect()
}
