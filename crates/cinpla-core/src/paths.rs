use crate::config::Config;
use crate::error::{CinplaError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const EXPIPE_DIR: &str = ".expipe";
pub const ACTIONS_DIR: &str = ".expipe/actions";
pub const SUBJECTS_DIR: &str = ".expipe/subjects";

pub const CONFIG_FILE: &str = ".expipe/config.yaml";
pub const ATTRIBUTES_FILE: &str = "attributes.yaml";
pub const CONTAINER_NAME: &str = "main.exdir";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn actions_dir(root: &Path) -> PathBuf {
    root.join(ACTIONS_DIR)
}

pub fn subjects_dir(root: &Path) -> PathBuf {
    root.join(SUBJECTS_DIR)
}

/// Where the container of `action_id` lives. Pure function of the id and
/// the configured `data_path`.
pub fn container_path(root: &Path, cfg: &Config, action_id: &str) -> PathBuf {
    match &cfg.data_path {
        Some(data_path) => data_path
            .join(&cfg.project.id)
            .join(action_id)
            .join(CONTAINER_NAME),
        None => actions_dir(root)
            .join(action_id)
            .join("data")
            .join(CONTAINER_NAME),
    }
}

/// Action ids become directory names, so they must be a single path segment.
pub fn validate_action_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id != "."
        && !id.contains("..")
        && !id.contains('/')
        && !id.contains('\\')
        && !id.chars().any(char::is_whitespace);
    if ok {
        Ok(())
    } else {
        Err(CinplaError::InvalidActionId(id.to_string()))
    }
}
