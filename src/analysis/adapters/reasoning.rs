use std::collections::BTreeSet;

use async_trait::async_trait;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;

use crate::{
    analysis::{
        adapters::output::parse_json_output,
        error::{AnalysisError, AnalysisErrorKind, internal_error, malformed_reasoning_output},
        ports::{ReasonerPort, ReasoningRequest},
        prompts,
        types::{
            Framework, OutcomeCase, OutcomeSeverity, PartialTradeoffs, ReasoningOutput,
            ReasoningStep, TradeoffScores,
        },
    },
    inference::{
        InferenceClient, InferenceError, InferenceErrorKind,
        types::{ChatMessage, ChatRequest, GenerationParams, OutputMode, ServiceProfile},
    },
};

/// Multi-framework reasoner backed by a chat-completion model.
#[derive(Clone)]
pub struct InferenceReasoner {
    client: InferenceClient,
    service: ServiceProfile,
    simulate_missing_outcomes: bool,
}

impl InferenceReasoner {
    pub fn new(
        client: InferenceClient,
        service: ServiceProfile,
        simulate_missing_outcomes: bool,
    ) -> Self {
        Self {
            client,
            service,
            simulate_missing_outcomes,
        }
    }

    async fn complete(
        &self,
        request_id: String,
        system: String,
        user: String,
        generation: GenerationParams,
    ) -> Result<String, InferenceError> {
        let response = self
            .client
            .chat_once(
                &self.service,
                ChatRequest {
                    request_id,
                    messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
                    output_mode: OutputMode::JsonObject,
                    generation,
                },
            )
            .await?;
        Ok(response.output_text)
    }

    async fn simulate_outcomes(
        &self,
        req: &ReasoningRequest,
        steps: &[ReasoningStep],
        recommendation: &str,
    ) -> Vec<OutcomeCase> {
        let prompt = prompts::build_outcome_simulation_prompt(&req.scenario, steps, recommendation);
        let result = self
            .complete(
                format!("reasoning-outcomes-{}", req.request_id),
                prompts::reasoning_system_prompt(),
                prompt,
                GenerationParams {
                    max_tokens: Some(768),
                    temperature: Some(0.8),
                    top_p: None,
                },
            )
            .await;

        let text = match result {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(
                    target: "pipeline",
                    request_id = %req.request_id,
                    error = %err,
                    "outcome_simulation_failed"
                );
                return Vec::new();
            }
        };

        match parse_json_output::<OutcomeEnvelope>(&text) {
            Ok(envelope) => convert_outcomes(envelope.outcomes),
            Err(err) => {
                tracing::warn!(
                    target: "pipeline",
                    request_id = %req.request_id,
                    error = %err,
                    "outcome_simulation_unparsable"
                );
                Vec::new()
            }
        }
    }
}

/// Shape the model is asked to return.
#[derive(Debug, Deserialize, JsonSchema)]
struct ReasoningEnvelope {
    /// Ordered inferential steps: stakeholders, trade-offs per framework, consequences.
    steps: Vec<StepDraft>,
    /// One synthesised recommendation.
    recommendation: String,
    /// Signed scores in [-10, 10]; omit dimensions of frameworks that were not requested.
    #[serde(default)]
    tradeoffs: PartialTradeoffs,
    /// Consequences of candidate actions, in the order considered.
    #[serde(default)]
    outcomes: Vec<OutcomeDraft>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(untagged)]
enum StepDraft {
    Text(String),
    Structured { description: String },
}

impl StepDraft {
    fn into_description(self) -> String {
        match self {
            StepDraft::Text(text) => text,
            StepDraft::Structured { description } => description,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OutcomeDraft {
    action: String,
    consequences: String,
    /// low, moderate, high or critical.
    #[serde(default)]
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OutcomeEnvelope {
    #[serde(default)]
    outcomes: Vec<OutcomeDraft>,
}

fn convert_outcomes(drafts: Vec<OutcomeDraft>) -> Vec<OutcomeCase> {
    drafts
        .into_iter()
        .filter(|draft| !draft.action.trim().is_empty())
        .map(|draft| OutcomeCase {
            action: draft.action.trim().to_string(),
            consequences: draft.consequences,
            severity: draft.severity.as_deref().and_then(OutcomeSeverity::parse),
        })
        .collect()
}

fn map_reasoning_error(err: &InferenceError) -> AnalysisError {
    match err.kind {
        InferenceErrorKind::ProtocolViolation => {
            malformed_reasoning_output(err.to_string()).with_retryable(false)
        }
        _ => AnalysisError::from_inference(AnalysisErrorKind::ReasoningUnavailable, err),
    }
}

/// Converts the model envelope into domain output. Tradeoffs are filled,
/// zeroed and clamped against the requested frameworks.
fn build_output(
    envelope: ReasoningEnvelope,
    frameworks: &BTreeSet<Framework>,
) -> Result<ReasoningOutput, AnalysisError> {
    let steps: Vec<ReasoningStep> = envelope
        .steps
        .into_iter()
        .map(|draft| draft.into_description().trim().to_string())
        .filter(|description| !description.is_empty())
        .enumerate()
        .map(|(position, description)| ReasoningStep {
            index: position as u32 + 1,
            description,
        })
        .collect();
    let recommendation = envelope.recommendation.trim().to_string();

    if steps.is_empty() {
        return Err(malformed_reasoning_output("reasoning output contained no steps"));
    }
    if recommendation.is_empty() {
        return Err(malformed_reasoning_output(
            "reasoning output contained an empty recommendation",
        ));
    }

    Ok(ReasoningOutput {
        steps,
        outcomes: convert_outcomes(envelope.outcomes),
        tradeoffs: TradeoffScores::resolve(envelope.tradeoffs, frameworks),
        recommendation,
    })
}

#[async_trait]
impl ReasonerPort for InferenceReasoner {
    async fn reason(&self, req: ReasoningRequest) -> Result<ReasoningOutput, AnalysisError> {
        let schema = serde_json::to_string(&schema_for!(ReasoningEnvelope))
            .map_err(|err| internal_error(format!("failed to render output schema: {err}")))?;
        let text = self
            .complete(
                format!("reasoning-{}", req.request_id),
                prompts::reasoning_system_prompt(),
                prompts::build_reasoning_prompt(
                    &req.scenario,
                    &req.frameworks,
                    &req.context,
                    &schema,
                ),
                GenerationParams {
                    max_tokens: Some(2048),
                    temperature: Some(0.7),
                    top_p: None,
                },
            )
            .await
            .map_err(|err| map_reasoning_error(&err))?;

        let envelope = parse_json_output::<ReasoningEnvelope>(&text)
            .map_err(|err| malformed_reasoning_output(err).with_retryable(false))?;
        let frameworks = req.frameworks.iter().copied().collect::<BTreeSet<_>>();
        let mut output = build_output(envelope, &frameworks)?;

        if output.outcomes.is_empty() && self.simulate_missing_outcomes {
            output.outcomes = self
                .simulate_outcomes(&req, &output.steps, &output.recommendation)
                .await;
        }

        tracing::debug!(
            target: "pipeline",
            request_id = %req.request_id,
            steps = output.steps.len(),
            outcomes = output.outcomes.len(),
            "reasoning_parsed"
        );
        Ok(output)
    }
}
