//! Post-extract layout normalization.
//!
//! Archives rarely ship with `gamedata/` at their root. Each catalog row
//! names the folders that hold the real content; those are hoisted to the
//! root, then everything the game does not read is removed.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::paths;

/// Top-level entries kept after normalization (matched case-insensitively).
pub const ALLOWED_TOP_LEVEL: &[&str] = &["gamedata", "appdata", "db", "fomod"];

/// Apply relocation `instructions` to `extract_dir`, then prune the top level.
///
/// For each instruction `p`, in order:
/// - `p/gamedata` exists: merge the contents of `p` into the root
/// - otherwise: merge the contents of `p` (if present) into `gamedata/`
///
/// Running this twice with the same instructions leaves the same tree.
pub fn normalize(extract_dir: &Path, instructions: &[String]) -> Result<()> {
    let fail = |e: std::io::Error| Error::normalization(extract_dir, e);

    for instruction in instructions {
        apply_instruction(extract_dir, instruction).map_err(fail)?;
    }
    prune_top_level(extract_dir).map_err(fail)
}

fn apply_instruction(extract_dir: &Path, instruction: &str) -> std::io::Result<()> {
    let source = paths::resolve_case_insensitive(extract_dir, instruction);
    let source = match source {
        Some(path) if path == extract_dir => {
            debug!("Ignoring instruction '{}' that names the root", instruction);
            return Ok(());
        }
        Some(path) if path.is_dir() => Some(path),
        _ => None,
    };

    if let Some(src) = &source {
        if paths::find_child_case_insensitive(src, "gamedata").is_some_and(|p| p.is_dir()) {
            debug!("Hoisting '{}' into root", instruction);
            return paths::merge_directories(src, extract_dir);
        }
    }

    let gamedata = match paths::find_child_case_insensitive(extract_dir, "gamedata") {
        Some(existing) if existing.is_dir() => existing,
        Some(existing) => {
            fs::remove_file(&existing)?;
            extract_dir.join("gamedata")
        }
        None => extract_dir.join("gamedata"),
    };
    fs::create_dir_all(&gamedata)?;

    match source {
        Some(src) if src != gamedata => {
            debug!("Merging '{}' into gamedata", instruction);
            paths::merge_directories(&src, &gamedata)
        }
        _ => Ok(()),
    }
}

fn prune_top_level(extract_dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(extract_dir)? {
        let entry = entry?;
        let name = paths::normalize_for_lookup(&entry.file_name().to_string_lossy());
        if ALLOWED_TOP_LEVEL.contains(&name.as_str()) {
            continue;
        }

        debug!("Removing {}", entry.path().display());
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
