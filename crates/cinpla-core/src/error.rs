use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CinplaError {
    #[error("not initialized: run 'cinpla init'")]
    NotInitialized,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("server '{0}' not found in configured servers")]
    UnknownServer(String),

    #[error("unsupported sorter '{0}'")]
    UnsupportedSorter(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid action id '{0}': must be non-empty without whitespace or path separators")]
    InvalidActionId(String),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("{0} already exists, use overwrite")]
    AlreadyExists(String),

    #[error("container path '{0}' already exists, use overwrite")]
    ContainerExists(PathBuf),

    #[error("connection to '{host}' failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("remote command failed with exit code {code}: {command}")]
    RemoteCommandFailed { command: String, code: i32 },

    #[error("spike sorting with '{sorter}' failed: {reason}")]
    SpikeSortingFailed { sorter: String, reason: String },

    #[error("signal toolkit '{op}' failed: {reason}")]
    ToolkitFailed { op: String, reason: String },

    #[error("archive command failed: {0}")]
    Archive(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CinplaError {
    /// Errors caused by missing or invalid options and configuration.
    /// These are raised before any mutation or network activity.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CinplaError::NotInitialized
                | CinplaError::Configuration(_)
                | CinplaError::UnknownServer(_)
                | CinplaError::UnsupportedSorter(_)
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            CinplaError::AlreadyExists(_) | CinplaError::ContainerExists(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CinplaError>;
