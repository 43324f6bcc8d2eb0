use async_trait::async_trait;

use crate::{
    analysis::{
        error::{AnalysisError, AnalysisErrorKind, embedding_unavailable},
        ports::{EmbeddingPort, EmbeddingRequest},
    },
    inference::{InferenceClient, types::ServiceProfile},
};

/// Embeds scenarios through an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct InferenceEmbedder {
    client: InferenceClient,
    service: ServiceProfile,
}

impl InferenceEmbedder {
    pub fn new(client: InferenceClient, service: ServiceProfile) -> Self {
        Self { client, service }
    }
}

#[async_trait]
impl EmbeddingPort for InferenceEmbedder {
    async fn embed(&self, req: EmbeddingRequest) -> Result<Vec<f32>, AnalysisError> {
        let vectors = self
            .client
            .embed(&self.service, &req.request_id, &[req.text])
            .await
            .map_err(|err| {
                AnalysisError::from_inference(AnalysisErrorKind::EmbeddingUnavailable, &err)
            })?;
        vectors
            .into_iter()
            .next()
            .filter(|vector| !vector.is_empty())
            .ok_or_else(|| {
                embedding_unavailable("embedding service returned an empty vector")
                    .with_retryable(false)
            })
    }
}
