use std::fmt;

use serde::{Deserialize, Serialize};

use crate::inference::types::ServiceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceErrorKind {
    InvalidRequest,
    Authentication,
    Authorization,
    RateLimited,
    Timeout,
    CircuitOpen,
    BackendTransient,
    BackendPermanent,
    ProtocolViolation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceError {
    pub kind: InferenceErrorKind,
    pub message: String,
    pub retryable: bool,
    pub service_id: Option<ServiceId>,
    pub provider_http_status: Option<u16>,
}

impl InferenceError {
    pub fn new(kind: InferenceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: matches!(
                kind,
                InferenceErrorKind::RateLimited
                    | InferenceErrorKind::Timeout
                    | InferenceErrorKind::BackendTransient
            ),
            service_id: None,
            provider_http_status: None,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = Some(service_id.into());
        self
    }

    pub fn with_provider_http_status(mut self, status: u16) -> Self {
        self.provider_http_status = Some(status);
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == InferenceErrorKind::Timeout
    }
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.service_id, self.provider_http_status) {
            (Some(service_id), Some(status)) => {
                write!(
                    f,
                    "{} (service={}, http_status={})",
                    self.message, service_id, status
                )
            }
            (Some(service_id), None) => write!(f, "{} (service={})", self.message, service_id),
            (None, Some(status)) => write!(f, "{} (http_status={})", self.message, status),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for InferenceError {}

pub fn invalid_request(message: impl Into<String>) -> InferenceError {
    InferenceError::new(InferenceErrorKind::InvalidRequest, message).with_retryable(false)
}

pub fn protocol_violation(message: impl Into<String>) -> InferenceError {
    InferenceError::new(InferenceErrorKind::ProtocolViolation, message).with_retryable(false)
}

pub fn internal_error(message: impl Into<String>) -> InferenceError {
    InferenceError::new(InferenceErrorKind::Internal, message).with_retryable(false)
}
