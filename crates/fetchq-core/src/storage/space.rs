//! Free-space probing for a destination directory.

use std::io;
use std::path::Path;

/// Bytes available to unprivileged users on the filesystem holding `dir`.
#[cfg(unix)]
#[allow(clippy::unnecessary_cast)]
pub fn available_space(dir: &Path) -> io::Result<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(dir.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let r = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if r != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
}

/// Non-Unix fallback: the check is skipped.
#[cfg(not(unix))]
pub fn available_space(_dir: &Path) -> io::Result<u64> {
    Ok(u64::MAX)
}

/// Returns a message if `dir` has less than `required` free bytes.
///
/// The directory is created first. If free space cannot be read, that counts as a shortfall.
pub fn free_space_shortfall(dir: &Path, required: u64) -> Option<String> {
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(dir = %dir.display(), "cannot create destination: {}", e);
        return Some(format!("cannot create {}: {}", dir.display(), e));
    }
    match available_space(dir) {
        Ok(free) if free >= required => None,
        Ok(free) => {
            tracing::warn!(
                dir = %dir.display(),
                "low disk space: {} MiB free, {} MiB required",
                free / (1024 * 1024),
                required / (1024 * 1024)
            );
            Some(format!(
                "not enough disk space in {}: {} MiB free, {} MiB required",
                dir.display(),
                free / (1024 * 1024),
                required / (1024 * 1024)
            ))
        }
        Err(e) => {
            tracing::error!(dir = %dir.display(), "disk space check failed: {}", e);
            Some(format!("disk space check failed for {}: {}", dir.display(), e))
        }
    }
}
