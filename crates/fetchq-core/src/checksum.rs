//! SHA-256 verification of finished artifacts.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Hex SHA-256 of the file at `path`, streamed so large artifacts stay out of memory.
pub fn sha256_path(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(64 * 1024, file);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher).with_context(|| format!("read {}", path.display()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare the file's digest against `expected` (hex, case-insensitive).
/// Returns `Ok(Some(actual))` on mismatch.
pub fn verify_sha256(path: &Path, expected: &str) -> Result<Option<String>> {
    let actual = sha256_path(path)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(None)
    } else {
        Ok(Some(actual))
    }
}
