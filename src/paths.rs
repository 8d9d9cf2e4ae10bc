//! Path helpers for catalogs authored on Windows.
//!
//! Catalog rows use backslashes and assume a case-insensitive filesystem.
//! This module handles:
//! - Converting `\` to `/`
//! - Case-insensitive lookups inside extracted trees
//! - Merging one directory tree into another

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Convert Windows path separators to `/`
/// `Main Files\gamedata` -> `Main Files/gamedata`
pub fn to_linux_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Make a catalog-provided name safe to use as a single path component.
pub fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_end_matches(['.', ' ']).to_string()
}

/// Find a direct child of `dir` whose name matches `name` case-insensitively.
/// An exact match wins over a case-folded one.
pub fn find_child_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.exists() {
        return Some(exact);
    }

    let target = name.to_lowercase();
    fs::read_dir(dir).ok()?.find_map(|entry| {
        let entry = entry.ok()?;
        if entry.file_name().to_string_lossy().to_lowercase() == target {
            Some(entry.path())
        } else {
            None
        }
    })
}

/// Resolve a relative catalog path under `base`, matching each component
/// case-insensitively.
///
/// Returns `None` if a component is missing or the path tries to leave `base`.
pub fn resolve_case_insensitive(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = to_linux_path(relative);
    let mut current = base.to_path_buf();

    for component in Path::new(&relative).components() {
        match component {
            Component::Normal(part) => {
                current = find_child_case_insensitive(&current, &part.to_string_lossy())?;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }

    Some(current)
}

/// Recursively merge `src` into `dst`, overwriting files on conflict.
///
/// Directories that already exist in `dst` under a different case are reused,
/// so the merged tree keeps the destination's spelling.
pub fn merge_directories(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if entry.file_type()?.is_dir() {
            let dst_path = match find_child_case_insensitive(dst, &name) {
                Some(existing) if existing.is_dir() => existing,
                Some(existing) => {
                    fs::remove_file(&existing)?;
                    dst.join(name.as_ref())
                }
                None => dst.join(name.as_ref()),
            };
            merge_directories(&src_path, &dst_path)?;
        } else {
            let dst_path = match find_child_case_insensitive(dst, &name) {
                Some(existing) if existing.is_dir() => {
                    fs::remove_dir_all(&existing)?;
                    dst.join(name.as_ref())
                }
                Some(existing) => existing,
                None => dst.join(name.as_ref()),
            };
            fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}

/// Copy a whole directory tree, skipping the `.git` folder of a checkout.
pub fn copy_tree_without_vcs(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        if entry.file_name() == ".git" {
            continue;
        }
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            merge_directories(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_to_linux_path() {
        assert_eq!(to_linux_path("Main\\gamedata\\configs"), "Main/gamedata/configs");
        assert_eq!(to_linux_path("already/linux/path"), "already/linux/path");
        assert_eq!(to_linux_path("mixed\\path/style"), "mixed/path/style");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_for_lookup("\\GameData\\Configs\\"), "gamedata/configs");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Guns: Part 1/2"), "Guns_ Part 1_2");
        assert_eq!(sanitize_component("Trailing. "), "Trailing");
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Main Files/GameData")).unwrap();

        let found = resolve_case_insensitive(dir.path(), "main files\\gamedata").unwrap();
        assert_eq!(found, dir.path().join("Main Files/GameData"));

        assert!(resolve_case_insensitive(dir.path(), "missing").is_none());
        assert!(resolve_case_insensitive(dir.path(), "../escape").is_none());
        assert_eq!(resolve_case_insensitive(dir.path(), ".").unwrap(), dir.path());
    }

    #[test]
    fn test_merge_directories_overwrites_and_reuses_case() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("configs")).unwrap();
        fs::create_dir_all(dst.join("Configs")).unwrap();
        fs::write(src.join("configs/a.ltx"), "new").unwrap();
        fs::write(dst.join("Configs/a.ltx"), "old").unwrap();
        fs::write(src.join("top.txt"), "top").unwrap();

        merge_directories(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("Configs/a.ltx")).unwrap(), "new");
        assert_eq!(fs::read_to_string(dst.join("top.txt")).unwrap(), "top");
        assert!(!dst.join("configs").exists() || cfg!(target_os = "macos") || cfg!(windows));
    }

    #[test]
    fn test_copy_tree_skips_git() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("repo");
        fs::create_dir_all(src.join(".git/objects")).unwrap();
        fs::create_dir_all(src.join("gamedata")).unwrap();
        fs::write(src.join("gamedata/x.script"), "x").unwrap();

        let dst = dir.path().join("out");
        copy_tree_without_vcs(&src, &dst).unwrap();

        assert!(dst.join("gamedata/x.script").exists());
        assert!(!dst.join(".git").exists());
    }
}
