use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting record files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Recursively copy `src` into `dest`, creating `dest` if needed.
pub fn copy_dir(src: &Path, dest: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(std::io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            copied += std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

/// A non-fatal problem hit while tearing down scratch resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub target: String,
    pub reason: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not remove {}: {}", self.target, self.reason)
    }
}

/// Remove a directory tree. Read-only entries get write permission forced
/// before a second attempt. A tree that still cannot be removed is reported
/// as a warning and logged, never raised.
pub fn remove_dir_forced(path: &Path) -> Option<CleanupWarning> {
    if !path.exists() {
        return None;
    }
    let first = match std::fs::remove_dir_all(path) {
        Ok(()) => return None,
        Err(e) => e,
    };
    tracing::debug!(path = %path.display(), error = %first, "retrying removal with forced permissions");
    force_writable(path);
    match std::fs::remove_dir_all(path) {
        Ok(()) => None,
        Err(e) => {
            let warning = CleanupWarning {
                target: path.display().to_string(),
                reason: e.to_string(),
            };
            tracing::warn!(path = %path.display(), error = %e, "path could not be removed");
            Some(warning)
        }
    }
}

fn force_writable(path: &Path) {
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                set_writable(&mut perms);
                let _ = std::fs::set_permissions(entry.path(), perms);
            }
        }
    }
}

#[cfg(unix)]
fn set_writable(perms: &mut std::fs::Permissions) {
    use std::os::unix::fs::PermissionsExt;
    perms.set_mode(perms.mode() | 0o700);
}

#[cfg(not(unix))]
#[allow(clippy::permissions_set_readonly_false)]
fn set_writable(perms: &mut std::fs::Permissions) {
    perms.set_readonly(false);
}

/// A uniquely named local scratch directory owned by one invocation.
///
/// Unlike `tempfile::TempDir`, removal goes through [`remove_dir_forced`] so
/// failures surface as [`CleanupWarning`]s instead of being dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn create_in(parent: &Path, prefix: &str) -> Result<Self> {
        ensure_dir(parent)?;
        let path = parent.join(format!("{prefix}{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> Option<CleanupWarning> {
        remove_dir_forced(&self.path)
    }
}
