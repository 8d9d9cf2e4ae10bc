//! External tool discovery.
//!
//! Lookup order for every tool:
//! 1. an explicit path from settings or the command line
//! 2. `bin/<name>` next to the executable, then `<name>` next to it
//! 3. `bin/<name>` in the working directory
//! 4. the system PATH

use std::path::{Path, PathBuf};

use tracing::debug;

/// 7-Zip binaries, preferred first.
pub const SEVEN_ZIP_NAMES: &[&str] = &["7zz", "7z", "7za"];

/// curl-impersonate wrappers with a Chrome-like fingerprint, preferred first.
pub const IMPERSONATE_NAMES: &[&str] = &[
    "curl_chrome116",
    "curl_chrome110",
    "curl-impersonate-chrome",
    "curl_ff117",
];

pub const GIT_NAMES: &[&str] = &["git"];
pub const UNZIP_NAMES: &[&str] = &["unzip"];
pub const TAR_NAMES: &[&str] = &["tar", "bsdtar"];

/// Find the first available binary among `names`.
///
/// An explicit path wins when it exists; a missing explicit path falls
/// through to discovery.
pub fn find_tool(names: &[&str], explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        debug!("Configured tool {} does not exist, searching", path.display());
    }

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));

    for name in names {
        let file_name = executable_name(name);

        if let Some(dir) = &exe_dir {
            for candidate in [dir.join("bin").join(&file_name), dir.join(&file_name)] {
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        let cwd_path = PathBuf::from("bin").join(&file_name);
        if cwd_path.is_file() {
            return Some(cwd_path);
        }

        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    None
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}
