use std::path::PathBuf;

use thiserror::Error;

use crate::analysis::error::{AnalysisError, not_found, persistence_failed};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("analysis record '{0}' not found")]
    NotFound(String),
    #[error("analysis id '{0}' is not a valid identifier")]
    InvalidId(String),
    #[error("history io failure at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("history record '{path}' could not be decoded: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("history record '{path}' could not be encoded: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported history envelope version {found} at '{path}'")]
    UnsupportedVersion { path: PathBuf, found: u64 },
    #[error("history worker failed: {0}")]
    Worker(String),
}

impl HistoryError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<HistoryError> for AnalysisError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(_) | HistoryError::InvalidId(_) => not_found(err.to_string()),
            HistoryError::Corrupt { .. } | HistoryError::UnsupportedVersion { .. } => {
                persistence_failed(err.to_string()).with_retryable(false)
            }
            other => persistence_failed(other.to_string()),
        }
    }
}
