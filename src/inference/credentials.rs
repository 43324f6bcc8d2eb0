use std::env;

use async_trait::async_trait;

use crate::inference::{
    error::{InferenceError, InferenceErrorKind, invalid_request},
    types::{CredentialRef, ResolvedCredential, ServiceProfile},
};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        service: &ServiceProfile,
    ) -> Result<ResolvedCredential, InferenceError>;
}

#[derive(Default)]
pub struct EnvCredentialProvider;

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn resolve(
        &self,
        reference: &CredentialRef,
        service: &ServiceProfile,
    ) -> Result<ResolvedCredential, InferenceError> {
        let mut resolved = match reference {
            CredentialRef::Env { var } => {
                let token = env::var(var).map_err(|_| {
                    InferenceError::new(
                        InferenceErrorKind::Authentication,
                        format!(
                            "missing credential environment variable {} for service {}",
                            var, service.id
                        ),
                    )
                    .with_retryable(false)
                    .with_service_id(service.id.clone())
                })?;
                ResolvedCredential {
                    auth_header: Some(format!("Bearer {}", token)),
                    extra_headers: Vec::new(),
                }
            }
            CredentialRef::InlineToken { token } => {
                if token.trim().is_empty() {
                    return Err(invalid_request("inline credential token cannot be empty")
                        .with_service_id(service.id.clone()));
                }
                ResolvedCredential {
                    auth_header: Some(format!("Bearer {}", token)),
                    extra_headers: Vec::new(),
                }
            }
            CredentialRef::None => ResolvedCredential::none(),
        };

        resolved.extra_headers.extend(
            service
                .extra_headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        Ok(resolved)
    }
}
