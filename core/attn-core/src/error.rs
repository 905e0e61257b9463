//! Error types for attn-core operations.

use std::path::PathBuf;

/// All errors that can occur in attn-core operations.
#[derive(Debug, thiserror::Error)]
pub enum AttnError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Transcript read failed: {path}: {source}")]
    TranscriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings write failed: {path}: {source}")]
    SettingsWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed todo payload: {0}")]
    MalformedTodos(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AttnError>;
