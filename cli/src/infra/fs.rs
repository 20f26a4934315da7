//! Filesystem helpers: permission enforcement and atomic writes.

use std::path::Path;

use anyhow::{Context, Result};

/// Set a Unix permission mode. No-op on non-Unix platforms.
///
/// # Errors
///
/// Returns an error if the permissions cannot be set.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("setting permissions on {}", path.display()))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Read the Unix permission bits of a path, or `None` off-Unix.
#[must_use]
#[cfg(unix)]
pub fn read_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[must_use]
#[cfg(not(unix))]
pub fn read_mode(_path: &Path) -> Option<u32> {
    None
}

/// Create a directory (and parents) and enforce `mode` on the leaf.
///
/// # Errors
///
/// Returns an error if creation or permission setting fails.
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("creating directory {}", path.display()))?;
    set_mode(path, mode)
}

/// Write a file atomically: temp file in the same directory, then rename
/// over the target, then enforce `mode`. A crash at any point leaves either
/// the old contents or the new, never a partial file.
///
/// # Errors
///
/// Returns an error if the temp file cannot be created, written or renamed.
pub fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    use std::io::Write as _;

    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("creating temp file in {}", parent.display()))?;
    tmp.write_all(contents)
        .with_context(|| format!("writing temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("syncing temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("renaming temp file over {}", path.display()))?;
    set_mode(path, mode)
}
