use std::fmt;

use crate::{analysis::types::AnalysisId, inference::InferenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisErrorKind {
    InvalidInput,
    ContentRejected,
    ReasoningUnavailable,
    MalformedReasoningOutput,
    IndexUnavailable,
    EmbeddingUnavailable,
    SafetyUnavailable,
    EvaluationUnavailable,
    PersistenceFailed,
    NotFound,
    Cancelled,
    Internal,
}

impl AnalysisErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisErrorKind::InvalidInput => "invalid_input",
            AnalysisErrorKind::ContentRejected => "content_rejected",
            AnalysisErrorKind::ReasoningUnavailable => "reasoning_unavailable",
            AnalysisErrorKind::MalformedReasoningOutput => "malformed_reasoning_output",
            AnalysisErrorKind::IndexUnavailable => "index_unavailable",
            AnalysisErrorKind::EmbeddingUnavailable => "embedding_unavailable",
            AnalysisErrorKind::SafetyUnavailable => "safety_unavailable",
            AnalysisErrorKind::EvaluationUnavailable => "evaluation_unavailable",
            AnalysisErrorKind::PersistenceFailed => "persistence_failed",
            AnalysisErrorKind::NotFound => "not_found",
            AnalysisErrorKind::Cancelled => "cancelled",
            AnalysisErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisError {
    pub kind: AnalysisErrorKind,
    pub message: String,
    pub retryable: bool,
    pub analysis_id: Option<AnalysisId>,
}

impl AnalysisError {
    pub fn new(kind: AnalysisErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                AnalysisErrorKind::ReasoningUnavailable
                    | AnalysisErrorKind::IndexUnavailable
                    | AnalysisErrorKind::EmbeddingUnavailable
                    | AnalysisErrorKind::SafetyUnavailable
                    | AnalysisErrorKind::EvaluationUnavailable
                    | AnalysisErrorKind::PersistenceFailed
            ),
            analysis_id: None,
        }
    }

    /// Wraps a remote-call failure, keeping its retry classification.
    pub fn from_inference(kind: AnalysisErrorKind, err: &InferenceError) -> Self {
        Self::new(kind, err.to_string()).with_retryable(err.retryable)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_analysis_id(mut self, analysis_id: impl Into<AnalysisId>) -> Self {
        self.analysis_id = Some(analysis_id.into());
        self
    }
}

impl fmt::Display for AnalysisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for AnalysisError {}

pub fn invalid_input(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::InvalidInput, message)
}

pub fn content_rejected(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::ContentRejected, message)
}

pub fn reasoning_unavailable(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::ReasoningUnavailable, message)
}

pub fn malformed_reasoning_output(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::MalformedReasoningOutput, message)
}

pub fn index_unavailable(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::IndexUnavailable, message)
}

pub fn embedding_unavailable(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::EmbeddingUnavailable, message)
}

pub fn safety_unavailable(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::SafetyUnavailable, message)
}

pub fn evaluation_unavailable(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::EvaluationUnavailable, message)
}

pub fn persistence_failed(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::PersistenceFailed, message)
}

pub fn not_found(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::NotFound, message)
}

pub fn cancelled(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::Cancelled, message)
}

pub fn internal_error(message: impl Into<String>) -> AnalysisError {
    AnalysisError::new(AnalysisErrorKind::Internal, message)
}
