use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::{
    analysis::{
        adapters::output::parse_json_output,
        error::{AnalysisError, AnalysisErrorKind, evaluation_unavailable, internal_error},
        ports::{EvaluationRequest, EvaluatorPort},
        prompts,
        types::EvaluationScores,
    },
    inference::{
        InferenceClient,
        types::{ChatMessage, ChatRequest, GenerationParams, OutputMode, ServiceProfile},
    },
};

const DIMENSIONS: [&str; 3] = ["context_relevance", "reasoning_coherence", "ethical_coverage"];

/// Quality grader backed by a chat-completion judge model.
#[derive(Clone)]
pub struct InferenceEvaluator {
    client: InferenceClient,
    service: ServiceProfile,
}

impl InferenceEvaluator {
    pub fn new(client: InferenceClient, service: ServiceProfile) -> Self {
        Self { client, service }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ScoreEnvelope {
    #[serde(default)]
    context_relevance: Option<f64>,
    #[serde(default)]
    reasoning_coherence: Option<f64>,
    #[serde(default)]
    ethical_coverage: Option<f64>,
}

#[async_trait]
impl EvaluatorPort for InferenceEvaluator {
    async fn score(&self, req: EvaluationRequest) -> Result<EvaluationScores, AnalysisError> {
        let request = ChatRequest {
            request_id: format!("evaluation-{}", req.request_id),
            messages: vec![
                ChatMessage::system(prompts::evaluator_system_prompt()),
                ChatMessage::user(prompts::build_evaluation_prompt(
                    &req.scenario,
                    &req.frameworks,
                    &req.context,
                    &req.steps,
                    &req.recommendation,
                )),
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
                AnalysisError::from_inference(AnalysisErrorKind::EvaluationUnavailable, &err)
            })?;
        extract_scores(&response.output_text)
    }
}

/// Reads the three scores from JSON, falling back to `name: value` pairs in
/// prose. Any dimension still missing is an error.
pub fn extract_scores(text: &str) -> Result<EvaluationScores, AnalysisError> {
    let parsed = parse_json_output::<ScoreEnvelope>(text).unwrap_or_default();
    let mut values = [
        parsed.context_relevance,
        parsed.reasoning_coherence,
        parsed.ethical_coverage,
    ];

    if values.iter().any(Option::is_none) {
        let patterns = score_patterns()?;
        for (slot, pattern) in values.iter_mut().zip(patterns) {
            if slot.is_none() {
                *slot = scrape_dimension(text, pattern);
            }
        }
    }

    match values {
        [Some(context_relevance), Some(reasoning_coherence), Some(ethical_coverage)] => {
            Ok(EvaluationScores {
                context_relevance,
                reasoning_coherence,
                ethical_coverage,
            }
            .clamped())
        }
        _ => {
            let missing = values
                .iter()
                .zip(DIMENSIONS)
                .filter(|(value, _)| value.is_none())
                .map(|(_, dimension)| dimension)
                .collect::<Vec<_>>()
                .join(", ");
            Err(
                evaluation_unavailable(format!("evaluator omitted dimensions: {missing}"))
                    .with_retryable(false),
            )
        }
    }
}

fn score_patterns() -> Result<&'static [Regex], AnalysisError> {
    static PATTERNS: OnceLock<Result<Vec<Regex>, regex::Error>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            DIMENSIONS
                .iter()
                .map(|dimension| {
                    let spaced = dimension.replace('_', "[_ ]");
                    Regex::new(&format!(r#"(?i){spaced}["']?[:=\s]+(-?[0-9]*\.?[0-9]+)"#))
                })
                .collect()
        })
        .as_ref()
        .map(Vec::as_slice)
        .map_err(|err| internal_error(format!("invalid score pattern: {err}")))
}

fn scrape_dimension(text: &str, pattern: &Regex) -> Option<f64> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse::<f64>().ok())
}
