use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{Client, header};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::inference::{
    credentials::CredentialProvider,
    error::{InferenceError, internal_error, invalid_request, protocol_violation},
    http_common,
    reliability::ReliabilityLayer,
    types::{ChatRequest, ChatResponse, OutputMode, ReliabilityConfig, ServiceProfile},
};

/// Thin JSON-over-HTTP client shared by every remote stage.
///
/// One attempt per call: retry decisions belong to the caller's stage policy,
/// while the circuit breaker here protects services that keep failing.
#[derive(Clone)]
pub struct InferenceClient {
    http: Client,
    credentials: Arc<dyn CredentialProvider>,
    reliability: ReliabilityLayer,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingEnvelope {
    data: Vec<EmbeddingDatum>,
}

impl InferenceClient {
    pub fn new(
        config: ReliabilityConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_millis(config.pool_idle_timeout_ms.max(1)))
            .build()
            .map_err(|err| internal_error(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            credentials,
            reliability: ReliabilityLayer::new(config),
        })
    }

    pub fn reliability(&self) -> &ReliabilityLayer {
        &self.reliability
    }

    pub async fn chat_once(
        &self,
        service: &ServiceProfile,
        request: ChatRequest,
    ) -> Result<ChatResponse, InferenceError> {
        if request.messages.is_empty() {
            return Err(invalid_request("chat request requires at least one message")
                .with_service_id(service.id.clone()));
        }

        let generation = request.generation.merged_with(&service.generation);
        let mut body = json!({
            "messages": http_common::messages_to_openai(&request.messages),
            "stream": false,
        });
        if let Some(model) = &service.model {
            body["model"] = Value::String(model.clone());
        }
        if let Some(max_tokens) = generation.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = generation.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = generation.top_p {
            body["top_p"] = json!(top_p);
        }
        if matches!(request.output_mode, OutputMode::JsonObject) {
            body["response_format"] = json!({"type": "json_object"});
        }

        let payload = self
            .post_json(service, "chat/completions", &request.request_id, &body)
            .await?;
        let (output_text, finish_reason) =
            http_common::first_choice_text(&payload).ok_or_else(|| {
                protocol_violation("completion response has no readable choice")
                    .with_service_id(service.id.clone())
            })?;

        Ok(ChatResponse {
            request_id: request.request_id,
            output_text,
            finish_reason: http_common::parse_finish_reason(finish_reason.as_deref()),
            usage: http_common::parse_usage(&payload),
        })
    }

    pub async fn embed(
        &self,
        service: &ServiceProfile,
        request_id: &str,
        inputs: &[String],
    ) -> Result<Vec<Vec<f32>>, InferenceError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = json!({ "input": inputs });
        if let Some(model) = &service.model {
            body["model"] = Value::String(model.clone());
        }

        let payload = self
            .post_json(service, "embeddings", request_id, &body)
            .await?;
        let mut envelope: EmbeddingEnvelope = serde_json::from_value(payload).map_err(|err| {
            protocol_violation(format!("embedding response decode failed: {err}"))
                .with_service_id(service.id.clone())
        })?;
        if envelope.data.len() != inputs.len() {
            return Err(protocol_violation(format!(
                "embedding response carried {} vectors for {} inputs",
                envelope.data.len(),
                inputs.len()
            ))
            .with_service_id(service.id.clone()));
        }

        envelope
            .data
            .sort_by_key(|datum| datum.index.unwrap_or(usize::MAX));
        Ok(envelope
            .data
            .into_iter()
            .map(|datum| datum.embedding)
            .collect())
    }

    /// POSTs `body` to `path` under the service endpoint and decodes a JSON reply.
    pub async fn post_json(
        &self,
        service: &ServiceProfile,
        path: &str,
        request_id: &str,
        body: &Value,
    ) -> Result<Value, InferenceError> {
        let permit = self.reliability.ensure_service_allowed(&service.id)?;

        let started_at = Instant::now();
        let result = self.send_json(service, path, request_id, body).await;
        match &result {
            Ok(_) => {
                permit.record_success();
                tracing::debug!(
                    target: "inference",
                    service_id = %service.id,
                    request_id = %request_id,
                    path = %path,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "service_call_completed"
                );
            }
            Err(err) => {
                permit.record_failure(ReliabilityLayer::counts_toward_breaker(err));
                tracing::debug!(
                    target: "inference",
                    service_id = %service.id,
                    request_id = %request_id,
                    path = %path,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    kind = ?err.kind,
                    retryable = err.retryable,
                    error = %err.message,
                    "service_call_failed"
                );
            }
        }
        result
    }

    async fn send_json(
        &self,
        service: &ServiceProfile,
        path: &str,
        request_id: &str,
        body: &Value,
    ) -> Result<Value, InferenceError> {
        let credential = self
            .credentials
            .resolve(&service.credential, service)
            .await?;

        let mut request = self
            .http
            .post(service.url(path))
            .timeout(service.timeout())
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-request-id", request_id)
            .json(body);
        if let Some(auth_header) = credential.auth_header {
            request = request.header(header::AUTHORIZATION, auth_header);
        }
        for (name, value) in credential.extra_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|err| http_common::map_transport_error(&err, &service.id))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(http_common::map_http_error(
                status.as_u16(),
                &service.id,
                &body,
            ));
        }

        response.json::<Value>().await.map_err(|err| {
            if err.is_timeout() {
                http_common::map_transport_error(&err, &service.id)
            } else {
                protocol_violation(format!("response body decode failed: {err}"))
                    .with_service_id(service.id.clone())
            }
        })
    }
}
