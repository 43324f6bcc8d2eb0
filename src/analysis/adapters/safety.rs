use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    analysis::{
        adapters::output::{excerpt, parse_json_output},
        error::{AnalysisError, AnalysisErrorKind},
        ports::{SafetyPort, SafetyRequest},
        prompts,
        types::{SafetyCategory, SafetyVerdict},
    },
    inference::{
        InferenceClient,
        types::{ChatMessage, ChatRequest, GenerationParams, OutputMode, ServiceProfile},
    },
};

/// Safety classifier backed by a chat-completion guard model.
#[derive(Clone)]
pub struct InferenceSafetyFilter {
    client: InferenceClient,
    service: ServiceProfile,
}

impl InferenceSafetyFilter {
    pub fn new(client: InferenceClient, service: ServiceProfile) -> Self {
        Self { client, service }
    }
}

#[derive(Debug, Deserialize)]
struct VerdictEnvelope {
    safe: bool,
    #[serde(default, alias = "rationale")]
    reason: Option<String>,
    #[serde(default)]
    category: Option<String>,
}

#[async_trait]
impl SafetyPort for InferenceSafetyFilter {
    async fn classify(&self, req: SafetyRequest) -> Result<SafetyVerdict, AnalysisError> {
        let request = ChatRequest {
            request_id: format!("safety-{}-{}", req.scope.as_str(), req.request_id),
            messages: vec![
                ChatMessage::system(prompts::safety_system_prompt(req.scope)),
                ChatMessage::user(prompts::build_safety_prompt(&req.text)),
            ],
            output_mode: OutputMode::JsonObject,
            generation: GenerationParams {
                max_tokens: Some(256),
                temperature: Some(0.0),
                top_p: None,
            },
        };
        let response = self
            .client
            .chat_once(&self.service, request)
            .await
            .map_err(|err| {
                AnalysisError::from_inference(AnalysisErrorKind::SafetyUnavailable, &err)
            })?;
        Ok(interpret_verdict(&response.output_text))
    }
}

/// Reads a JSON verdict, falling back to keyword interpretation of prose.
pub fn interpret_verdict(text: &str) -> SafetyVerdict {
    if let Ok(envelope) = parse_json_output::<VerdictEnvelope>(text) {
        let rationale = envelope
            .reason
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty());
        return if envelope.safe {
            SafetyVerdict::safe(rationale.unwrap_or_else(|| "no policy concerns".to_string()))
        } else {
            let category = envelope
                .category
                .as_deref()
                .map(SafetyCategory::parse)
                .filter(|category| *category != SafetyCategory::None)
                .unwrap_or(SafetyCategory::Other);
            SafetyVerdict::unsafe_because(
                rationale.unwrap_or_else(|| "content policy violation".to_string()),
                category,
            )
        };
    }

    let lowered = text.to_ascii_lowercase();
    if lowered.contains("unsafe") || lowered.contains("violate") {
        SafetyVerdict::unsafe_because(excerpt(text, 200), SafetyCategory::Other)
    } else {
        SafetyVerdict::safe(excerpt(text, 200))
    }
}
