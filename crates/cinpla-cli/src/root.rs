use std::path::{Path, PathBuf};

use cinpla_core::paths::EXPIPE_DIR;

/// Resolve the project root.
///
/// Priority:
/// 1. `--root` flag / `CINPLA_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `.expipe/`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_project(&cwd).unwrap_or(cwd)
}

fn find_project(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(EXPIPE_DIR).is_dir())
        .map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_root_wins() {
        let dir = TempDir::new().unwrap();
        let result = resolve_root(Some(dir.path()));
        assert_eq!(result, dir.path());
    }

    #[test]
    fn finds_expipe_dir_above() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".expipe")).unwrap();
        let subdir = dir.path().join("raw/rat1");
        std::fs::create_dir_all(&subdir).unwrap();
        assert_eq!(find_project(&subdir).as_deref(), Some(dir.path()));
    }

    #[test]
    fn no_project_found() {
        let dir = TempDir::new().unwrap();
        assert!(find_project(dir.path()).is_none());
    }
}
