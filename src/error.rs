//! Error types for index version management

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("No index versions for index '{name}' ready; run offline reindex")]
    NoReadyVersion { name: String },

    #[error("Unsupported schema version {version} for index '{name}'; supported versions: {supported:?}")]
    UnsupportedVersion {
        name: String,
        version: u32,
        supported: Vec<u32>,
    },

    #[error("Reindexer for index '{0}' is already running")]
    ReindexerAlreadyRunning(String),

    #[error("Unknown index '{0}'")]
    UnknownIndex(String),

    #[error("No write index registered for index '{name}' version {version}")]
    MissingWriteIndex { name: String, version: u32 },

    #[error("Cannot remove write index '{name}' version {version}: it is the search index")]
    RemoveSearchIndex { name: String, version: u32 },

    #[error("Online index upgrade is disabled")]
    OnlineUpgradeDisabled,

    #[error("Reindex error: {0}")]
    Reindex(String),

    #[error("Index executor has been shut down")]
    ExecutorShutdown,

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IndexError {
    /// Get error code for operator tooling
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::Config(_) => "CONFIG_ERROR",
            IndexError::NoReadyVersion { .. } => "NO_READY_VERSION",
            IndexError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            IndexError::ReindexerAlreadyRunning(_) => "REINDEXER_ALREADY_RUNNING",
            IndexError::UnknownIndex(_) => "UNKNOWN_INDEX",
            IndexError::MissingWriteIndex { .. } => "MISSING_WRITE_INDEX",
            IndexError::RemoveSearchIndex { .. } => "REMOVE_SEARCH_INDEX",
            IndexError::OnlineUpgradeDisabled => "ONLINE_UPGRADE_DISABLED",
            IndexError::ExecutorShutdown => "EXECUTOR_SHUTDOWN",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether the error must stop the server from serving the index
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            IndexError::NoReadyVersion { .. }
                | IndexError::Config(_)
                | IndexError::UnsupportedVersion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_error_code() {
        let err = IndexError::ReindexerAlreadyRunning("changes".to_string());
        assert_eq!(err.code(), "REINDEXER_ALREADY_RUNNING");
        assert_eq!(err.to_string(), "Reindexer for index 'changes' is already running");
    }

    #[test]
    fn test_no_ready_version_is_fatal() {
        let err = IndexError::NoReadyVersion { name: "accounts".to_string() };
        assert!(err.is_fatal_at_startup());
        assert!(err.to_string().contains("run offline reindex"));
    }

    #[test]
    fn test_io_error_maps_to_internal() {
        let err: IndexError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(!err.is_fatal_at_startup());
    }
}
