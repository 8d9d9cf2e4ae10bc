//! Permission repair after extraction.
//!
//! Archives built on other systems carry read-only or owner-less mode bits
//! that later block overwrite and delete during updates.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Give the owner read, write and execute on everything under `dir`.
///
/// `walkdir` opens a directory before yielding it, so a directory that had
/// to be repaired is skipped and walked again once it is readable.
#[cfg(unix)]
pub fn fix_permissions_recursive(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut pending = vec![dir.to_path_buf()];
    while let Some(root) = pending.pop() {
        let mut walker = walkdir::WalkDir::new(&root).into_iter();
        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if entry.path_is_symlink() {
                continue;
            }

            let metadata = entry.metadata().map_err(io::Error::other)?;
            let mut perms = metadata.permissions();
            let mode = perms.mode();
            if mode & 0o700 == 0o700 {
                continue;
            }

            let wanted = if metadata.is_dir() { 0o755 } else { 0o700 };
            perms.set_mode(mode | wanted);
            fs::set_permissions(entry.path(), perms)?;

            if metadata.is_dir() {
                walker.skip_current_dir();
                pending.push(entry.path().to_path_buf());
            }
        }
    }

    Ok(())
}

/// Clear the read-only attribute on everything under `dir`.
#[cfg(not(unix))]
pub fn fix_permissions_recursive(dir: &Path) -> io::Result<()> {
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let metadata = entry.metadata().map_err(io::Error::other)?;
        let mut perms = metadata.permissions();
        if perms.readonly() {
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test]
    fn test_fixes_locked_tree() {
        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("file.ltx"), "x").unwrap();

        fs::set_permissions(locked.join("file.ltx"), fs::Permissions::from_mode(0o400)).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        fix_permissions_recursive(dir.path()).unwrap();

        assert_eq!(mode(&locked) & 0o700, 0o700);
        assert_eq!(mode(&locked.join("file.ltx")) & 0o700, 0o700);
        fs::remove_dir_all(&locked).unwrap();
    }

    #[test]
    fn test_repairs_children_of_unreadable_directory() {
        let dir = tempdir().unwrap();
        let sealed = dir.path().join("sealed");
        let nested = sealed.join("nested");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("item.ltx"), "x").unwrap();

        fs::set_permissions(nested.join("item.ltx"), fs::Permissions::from_mode(0o200)).unwrap();
        fs::set_permissions(&nested, fs::Permissions::from_mode(0o300)).unwrap();
        fs::set_permissions(&sealed, fs::Permissions::from_mode(0o000)).unwrap();

        fix_permissions_recursive(dir.path()).unwrap();

        assert_eq!(mode(&sealed) & 0o700, 0o700);
        assert_eq!(mode(&nested) & 0o700, 0o700);
        assert_eq!(mode(&nested.join("item.ltx")) & 0o700, 0o700);
        fs::remove_dir_all(&sealed).unwrap();
    }

    #[test]
    fn test_leaves_good_modes_alone() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o750)).unwrap();

        fix_permissions_recursive(dir.path()).unwrap();
        assert_eq!(mode(&script), 0o750);
    }
}
