//! Archive hash verification.
//!
//! Catalog hashes are lowercase hex MD5 of the whole archive, as published by
//! the file host.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Compute the MD5 of a file as lowercase hex.
///
/// Streams the file; `on_progress` receives (bytes_hashed, total_bytes).
pub fn compute_md5(path: &Path, on_progress: Option<&dyn Fn(u64, u64)>) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let total = file.metadata().map(|m| m.len()).unwrap_or(0);

    let mut reader = BufReader::with_capacity(1024 * 1024, file); // 1MB buffer
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 65536];
    let mut hashed = 0u64;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        context.write_all(&buffer[..bytes_read])?;
        hashed += bytes_read as u64;

        if let Some(cb) = on_progress {
            cb(hashed, total);
        }
    }

    Ok(format!("{:x}", context.compute()))
}

/// Check whether the file at `path` exists and hashes to `expected`.
///
/// A missing file is a mismatch, not an error.
pub fn matches_md5(
    path: &Path,
    expected: &str,
    on_progress: Option<&dyn Fn(u64, u64)>,
) -> Result<bool> {
    if !path.is_file() {
        return Ok(false);
    }
    let actual = compute_md5(path, on_progress)?;
    Ok(actual.eq_ignore_ascii_case(expected))
}
