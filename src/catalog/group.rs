//! Archive grouping.
//!
//! Several catalog rows can point at the same upstream archive and only
//! differ in what they extract from it. Those rows are collapsed into one
//! group so the archive is fetched once and unpacked once per member.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::record::{AddonRecord, SourceKind};

/// Records sharing one physical archive.
#[derive(Debug, Clone)]
pub struct ArchiveGroup {
    /// Where the archive (or repository checkout) lives on disk
    pub archive_path: PathBuf,
    /// Members sorted by catalog index; never empty
    members: Vec<AddonRecord>,
}

impl ArchiveGroup {
    /// The member used to trigger the fetch (lowest index).
    pub fn representative(&self) -> &AddonRecord {
        &self.members[0]
    }

    pub fn members(&self) -> &[AddonRecord] {
        &self.members
    }

    pub fn kind(&self) -> SourceKind {
        self.representative().kind
    }

    /// Lowest catalog index among members.
    pub fn first_index(&self) -> usize {
        self.representative().index
    }

    /// Stable identifier for reports: the archive file name.
    pub fn id(&self) -> &str {
        &self.representative().archive_file_name
    }
}

/// Partition records by archive path under `downloads_dir`.
///
/// Groups come back ordered by their lowest member index so install order
/// follows the catalog.
pub fn group(records: Vec<AddonRecord>, downloads_dir: &Path) -> Vec<ArchiveGroup> {
    let mut by_path: HashMap<PathBuf, Vec<AddonRecord>> = HashMap::new();

    for record in records {
        let path = downloads_dir.join(&record.archive_file_name);
        by_path.entry(path).or_default().push(record);
    }

    let mut groups: Vec<ArchiveGroup> = by_path
        .into_iter()
        .map(|(archive_path, mut members)| {
            members.sort_by_key(|m| m.index);
            ArchiveGroup {
                archive_path,
                members,
            }
        })
        .collect();

    groups.sort_by_key(|g| g.first_index());
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, archive: &str) -> AddonRecord {
        AddonRecord {
            index,
            name: format!("Addon {}", index),
            url: "https://www.moddb.com/downloads/start/1".to_string(),
            mirror_catalog_url: Some("https://www.moddb.com/downloads/start/1/all".to_string()),
            md5: None,
            archive_file_name: archive.to_string(),
            patch: "- p".to_string(),
            instructions: Vec::new(),
            kind: SourceKind::FileHost,
            nice_url: String::new(),
        }
    }

    #[test]
    fn test_shared_archive_makes_one_group() {
        let records = vec![record(3, "pack.7z"), record(1, "pack.7z"), record(2, "pack.7z")];
        let groups = group(records, Path::new("/dl"));

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members().len(), 3);
        assert_eq!(groups[0].representative().index, 1);
        assert_eq!(groups[0].archive_path, Path::new("/dl/pack.7z"));
    }

    #[test]
    fn test_groups_ordered_by_min_index() {
        let records = vec![
            record(5, "b.zip"),
            record(2, "a.7z"),
            record(1, "b.zip"),
            record(9, "c.rar"),
        ];
        let groups = group(records, Path::new("/dl"));

        let order: Vec<&str> = groups.iter().map(|g| g.id()).collect();
        assert_eq!(order, vec!["b.zip", "a.7z", "c.rar"]);
        assert_eq!(
            groups[0].members().iter().map(|m| m.index).collect::<Vec<_>>(),
            vec![1, 5]
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashSet;

        proptest! {
            #[test]
            fn test_group_count_equals_distinct_archives(
                archives in proptest::collection::vec(0usize..8, 0..40)
            ) {
                let records: Vec<AddonRecord> = archives
                    .iter()
                    .enumerate()
                    .map(|(i, a)| record(i + 1, &format!("archive{}.7z", a)))
                    .collect();
                let distinct: HashSet<usize> = archives.iter().copied().collect();

                let groups = group(records, Path::new("/dl"));

                prop_assert_eq!(groups.len(), distinct.len());
                let members: usize = groups.iter().map(|g| g.members().len()).sum();
                prop_assert_eq!(members, archives.len());
            }
        }
    }
}
