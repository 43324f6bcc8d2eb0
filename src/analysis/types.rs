use std::{collections::BTreeSet, fmt};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type AnalysisId = String;

pub const MAX_SCENARIO_CHARS: u64 = 20_000;

/// A moral reasoning lens a caller may request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Framework {
    Utilitarian,
    Deontological,
    Virtue,
    #[serde(alias = "rights_based")]
    RightsBased,
    Contractualist,
    Care,
}

impl Framework {
    pub const ALL: [Framework; 6] = [
        Framework::Utilitarian,
        Framework::Deontological,
        Framework::Virtue,
        Framework::RightsBased,
        Framework::Contractualist,
        Framework::Care,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Framework::Utilitarian => "utilitarian",
            Framework::Deontological => "deontological",
            Framework::Virtue => "virtue",
            Framework::RightsBased => "rights-based",
            Framework::Contractualist => "contractualist",
            Framework::Care => "care",
        }
    }

    /// Case-insensitive lookup; `_` and `-` are interchangeable.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|framework| framework.as_str() == normalized)
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated ingress request. Never mutated after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub scenario: String,
    pub frameworks: BTreeSet<Framework>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

impl AnalysisRequest {
    pub fn framework_list(&self) -> Vec<Framework> {
        self.frameworks.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    pub similarity: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyScope {
    Input,
    Output,
}

impl SafetyScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyScope::Input => "input",
            SafetyScope::Output => "output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyCategory {
    #[default]
    None,
    SelfHarm,
    Violence,
    Hate,
    Sexual,
    Illegal,
    Other,
}

impl SafetyCategory {
    pub fn parse(label: &str) -> Self {
        match label
            .trim()
            .to_ascii_lowercase()
            .replace(['_', ' '], "-")
            .as_str()
        {
            "" | "none" | "safe" => SafetyCategory::None,
            "self-harm" | "selfharm" | "suicide" => SafetyCategory::SelfHarm,
            "violence" | "violent" => SafetyCategory::Violence,
            "hate" | "harassment" => SafetyCategory::Hate,
            "sexual" | "sexual-content" => SafetyCategory::Sexual,
            "illegal" | "criminal" => SafetyCategory::Illegal,
            _ => SafetyCategory::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub safe: bool,
    pub rationale: String,
    pub category: SafetyCategory,
}

impl SafetyVerdict {
    pub fn safe(rationale: impl Into<String>) -> Self {
        Self {
            safe: true,
            rationale: rationale.into(),
            category: SafetyCategory::None,
        }
    }

    pub fn unsafe_because(rationale: impl Into<String>, category: SafetyCategory) -> Self {
        Self {
            safe: false,
            rationale: rationale.into(),
            category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: u32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeSeverity {
    Low,
    Moderate,
    High,
    Critical,
}

impl OutcomeSeverity {
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Some(OutcomeSeverity::Low),
            "moderate" | "medium" => Some(OutcomeSeverity::Moderate),
            "high" | "major" | "severe" => Some(OutcomeSeverity::High),
            "critical" => Some(OutcomeSeverity::Critical),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCase {
    pub action: String,
    pub consequences: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<OutcomeSeverity>,
}

/// Tradeoff dimensions as the model reported them; any may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PartialTradeoffs {
    #[serde(default)]
    pub utilitarian_harm: Option<f64>,
    #[serde(default)]
    pub deontological_duty: Option<f64>,
    #[serde(default)]
    pub rights_violation: Option<f64>,
    #[serde(default)]
    pub precedent_risk: Option<f64>,
}

/// Fixed four-dimension tradeoff chart. All keys always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeoffScores {
    pub utilitarian_harm: f64,
    pub deontological_duty: f64,
    pub rights_violation: f64,
    pub precedent_risk: f64,
}

impl TradeoffScores {
    pub const MIN: f64 = -10.0;
    pub const MAX: f64 = 10.0;

    /// Fills missing dimensions with 0, zeroes dimensions whose owning framework
    /// was not requested and clamps the rest into [-10, 10].
    pub fn resolve(partial: PartialTradeoffs, frameworks: &BTreeSet<Framework>) -> Self {
        let owned = |framework: Framework, value: Option<f64>| {
            if frameworks.contains(&framework) {
                clamp_score(value.unwrap_or(0.0))
            } else {
                0.0
            }
        };
        Self {
            utilitarian_harm: owned(Framework::Utilitarian, partial.utilitarian_harm),
            deontological_duty: owned(Framework::Deontological, partial.deontological_duty),
            rights_violation: owned(Framework::RightsBased, partial.rights_violation),
            precedent_risk: clamp_score(partial.precedent_risk.unwrap_or(0.0)),
        }
    }

    pub fn restricted_to(self, frameworks: &BTreeSet<Framework>) -> Self {
        Self::resolve(
            PartialTradeoffs {
                utilitarian_harm: Some(self.utilitarian_harm),
                deontological_duty: Some(self.deontological_duty),
                rights_violation: Some(self.rights_violation),
                precedent_risk: Some(self.precedent_risk),
            },
            frameworks,
        )
    }
}

fn clamp_score(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(TradeoffScores::MIN, TradeoffScores::MAX)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub context_relevance: f64,
    pub reasoning_coherence: f64,
    pub ethical_coverage: f64,
}

impl EvaluationScores {
    pub fn clamped(self) -> Self {
        let unit = |value: f64| {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            }
        };
        Self {
            context_relevance: unit(self.context_relevance),
            reasoning_coherence: unit(self.reasoning_coherence),
            ethical_coverage: unit(self.ethical_coverage),
        }
    }
}

/// What the reasoning engine hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningOutput {
    pub steps: Vec<ReasoningStep>,
    pub outcomes: Vec<OutcomeCase>,
    pub tradeoffs: TradeoffScores,
    pub recommendation: String,
}

impl ReasoningOutput {
    /// Text submitted to the output safety gate.
    pub fn gate_text(&self) -> String {
        let mut text = self.recommendation.clone();
        for step in &self.steps {
            text.push('\n');
            text.push_str(&step.description);
        }
        for outcome in &self.outcomes {
            text.push('\n');
            text.push_str(&outcome.consequences);
        }
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyStatus {
    #[default]
    Verified,
    UnverifiedInput,
    UnverifiedOutput,
    /// Neither gate could be consulted.
    Unverified,
    RejectedInput,
    SuppressedOutput,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseFlags {
    #[serde(skip_serializing_if = "is_false")]
    pub unverified_input: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub unverified_output: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub degraded_retrieval: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub degraded_evaluation: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub suppressed: bool,
    /// The write was not confirmed within the persistence budget. A write that
    /// outlived the budget may still have landed.
    #[serde(skip_serializing_if = "is_false")]
    pub persistence_failed: bool,
}

impl ResponseFlags {
    pub fn safety_status(&self) -> SafetyStatus {
        match (self.suppressed, self.unverified_input, self.unverified_output) {
            (true, _, _) => SafetyStatus::SuppressedOutput,
            (false, true, true) => SafetyStatus::Unverified,
            (false, true, false) => SafetyStatus::UnverifiedInput,
            (false, false, true) => SafetyStatus::UnverifiedOutput,
            (false, false, false) => SafetyStatus::Verified,
        }
    }
}

pub const SUPPRESSED_RECOMMENDATION: &str =
    "This analysis was withheld because it did not pass the output safety check.";

/// Unit of persistence. Written once per run that reached assembly or
/// tripped a safety gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: AnalysisId,
    pub request: AnalysisRequest,
    pub steps: Vec<ReasoningStep>,
    pub outcomes: Vec<OutcomeCase>,
    pub tradeoffs: TradeoffScores,
    pub evaluation: Option<EvaluationScores>,
    pub recommendation: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub safety_status: SafetyStatus,
    #[serde(default)]
    pub flags: ResponseFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl AnalysisRecord {
    pub fn rejected_input(
        id: AnalysisId,
        request: AnalysisRequest,
        verdict: &SafetyVerdict,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            request,
            steps: Vec::new(),
            outcomes: Vec::new(),
            tradeoffs: TradeoffScores::default(),
            evaluation: None,
            recommendation: String::new(),
            created_at,
            safety_status: SafetyStatus::RejectedInput,
            flags: ResponseFlags::default(),
            rejection_reason: Some(verdict.rationale.clone()),
        }
    }

    /// Redacted copy kept when the output gate trips.
    pub fn suppressed(mut self, verdict: &SafetyVerdict) -> Self {
        self.steps.clear();
        self.outcomes.clear();
        self.recommendation = SUPPRESSED_RECOMMENDATION.to_string();
        self.flags.suppressed = true;
        self.safety_status = SafetyStatus::SuppressedOutput;
        self.rejection_reason = Some(verdict.rationale.clone());
        self
    }
}

/// Wire shape returned by `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub analysis_id: AnalysisId,
    pub recommendation: String,
    pub reasoning: Vec<String>,
    pub outcomes: Vec<OutcomeCase>,
    pub tradeoffs: TradeoffScores,
    pub evaluation: Option<EvaluationScores>,
    pub flags: ResponseFlags,
    pub frameworks: Vec<Framework>,
    pub context_passages: usize,
}

impl AnalysisResponse {
    pub fn from_record(record: &AnalysisRecord, context_passages: usize) -> Self {
        Self {
            analysis_id: record.id.clone(),
            recommendation: record.recommendation.clone(),
            reasoning: record
                .steps
                .iter()
                .map(|step| step.description.clone())
                .collect(),
            outcomes: record.outcomes.clone(),
            tradeoffs: record.tradeoffs,
            evaluation: record.evaluation,
            flags: record.flags,
            frameworks: record.request.framework_list(),
            context_passages,
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_ms: u64,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_ms: u64,
    #[serde(default = "default_safety_timeout_ms")]
    pub input_safety_ms: u64,
    #[serde(default = "default_reasoning_timeout_ms")]
    pub reasoning_ms: u64,
    #[serde(default = "default_safety_timeout_ms")]
    pub output_safety_ms: u64,
    #[serde(default = "default_evaluation_timeout_ms")]
    pub evaluation_ms: u64,
    #[serde(default = "default_persistence_timeout_ms")]
    pub persistence_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            embedding_ms: default_embedding_timeout_ms(),
            retrieval_ms: default_retrieval_timeout_ms(),
            input_safety_ms: default_safety_timeout_ms(),
            reasoning_ms: default_reasoning_timeout_ms(),
            output_safety_ms: default_safety_timeout_ms(),
            evaluation_ms: default_evaluation_timeout_ms(),
            persistence_ms: default_persistence_timeout_ms(),
        }
    }
}

fn default_embedding_timeout_ms() -> u64 {
    10_000
}

fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

fn default_safety_timeout_ms() -> u64 {
    15_000
}

fn default_reasoning_timeout_ms() -> u64 {
    120_000
}

fn default_evaluation_timeout_ms() -> u64 {
    30_000
}

fn default_persistence_timeout_ms() -> u64 {
    5_000
}

/// Immutable orchestration settings injected at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default = "default_true")]
    pub retry_read_stages: bool,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub simulate_missing_outcomes: bool,
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: 0.0,
            retry_read_stages: true,
            retry_backoff_ms: default_retry_backoff_ms(),
            simulate_missing_outcomes: true,
            stage_timeouts: StageTimeouts::default(),
        }
    }
}
