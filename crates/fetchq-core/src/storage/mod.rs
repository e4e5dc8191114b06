//! Disk I/O helpers: temp-file naming, atomic replace, and free-space checks.
//!
//! Output is always written next to its final location and then renamed into
//! place, so a crash never leaves a half-written file under the final name.

mod space;

pub use space::{available_space, free_space_shortfall};

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// Replace `path` with `bytes` atomically: write a temp file in the same
/// directory, fsync it, then rename it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Rename a finished temp file to its final name. Fails across filesystems.
pub fn finalize(temp: &Path, final_path: &Path) -> Result<()> {
    std::fs::rename(temp, final_path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            temp.display(),
            final_path.display()
        )
    })
}
