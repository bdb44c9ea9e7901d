//! Tar packaging through the system `tar` binary.
//!
//! The same binary is present on every processing server, so archives made
//! here unpack there without format surprises.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{CinplaError, Result};

/// Package the contents of `dir` (not `dir` itself) into `archive`.
pub fn pack(dir: &Path, archive: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(CinplaError::Archive(format!(
            "'{}' is not a directory",
            dir.display()
        )));
    }
    let mut cmd = Command::new("tar");
    cmd.arg("-cf").arg(archive).arg("-C").arg(dir).arg(".");
    run(cmd, "pack")
}

/// Extract `archive` into `dest`, creating `dest` if needed.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    if !archive.is_file() {
        return Err(CinplaError::Archive(format!(
            "archive '{}' does not exist",
            archive.display()
        )));
    }
    std::fs::create_dir_all(dest)?;
    let mut cmd = Command::new("tar");
    cmd.arg("-xf").arg(archive).arg("-C").arg(dest);
    run(cmd, "unpack")
}

fn run(mut cmd: Command, what: &str) -> Result<()> {
    tracing::debug!(command = ?cmd, "running tar");
    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|e| CinplaError::Archive(format!("cannot run tar: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CinplaError::Archive(format!(
            "tar {what} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pack_then_unpack_preserves_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("session");
        std::fs::create_dir_all(src.join("Record Node 101")).unwrap();
        std::fs::write(src.join("Record Node 101/continuous.dat"), b"abc").unwrap();
        std::fs::write(src.join("settings.xml"), b"<SETTINGS/>").unwrap();

        let tar = dir.path().join("session.tar");
        pack(&src, &tar).unwrap();

        let out = dir.path().join("out");
        unpack(&tar, &out).unwrap();
        assert_eq!(
            std::fs::read(out.join("Record Node 101/continuous.dat")).unwrap(),
            b"abc"
        );
        assert!(out.join("settings.xml").exists());
    }

    #[test]
    fn pack_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        let err = pack(&dir.path().join("nope"), &dir.path().join("x.tar")).unwrap_err();
        assert!(matches!(err, CinplaError::Archive(_)));
    }

    #[test]
    fn unpack_garbage_fails() {
        let dir = TempDir::new().unwrap();
        let tar = dir.path().join("bad.tar");
        std::fs::write(&tar, b"not a tar archive").unwrap();
        assert!(unpack(&tar, &dir.path().join("out")).is_err());
    }
}
