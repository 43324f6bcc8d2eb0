use async_trait::async_trait;

use crate::analysis::{
    error::AnalysisError,
    stage::StageName,
    types::{
        AnalysisRecord, EvaluationScores, Framework, ReasoningOutput, ReasoningStep,
        RetrievedPassage, SafetyScope, SafetyVerdict,
    },
};

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub request_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub request_id: String,
    pub embedding: Vec<f32>,
    pub k: usize,
    pub min_similarity: f32,
}

#[derive(Debug, Clone)]
pub struct SafetyRequest {
    pub request_id: String,
    pub text: String,
    pub scope: SafetyScope,
}

#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub request_id: String,
    pub scenario: String,
    pub frameworks: Vec<Framework>,
    pub context: Vec<RetrievedPassage>,
}

#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub request_id: String,
    pub scenario: String,
    pub frameworks: Vec<Framework>,
    pub context: Vec<RetrievedPassage>,
    pub steps: Vec<ReasoningStep>,
    pub recommendation: String,
}

#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    async fn embed(&self, req: EmbeddingRequest) -> Result<Vec<f32>, AnalysisError>;
}

#[async_trait]
pub trait RetrieverPort: Send + Sync {
    async fn retrieve(&self, req: RetrievalRequest)
    -> Result<Vec<RetrievedPassage>, AnalysisError>;
}

#[async_trait]
pub trait SafetyPort: Send + Sync {
    async fn classify(&self, req: SafetyRequest) -> Result<SafetyVerdict, AnalysisError>;
}

#[async_trait]
pub trait ReasonerPort: Send + Sync {
    async fn reason(&self, req: ReasoningRequest) -> Result<ReasoningOutput, AnalysisError>;
}

#[async_trait]
pub trait EvaluatorPort: Send + Sync {
    async fn score(&self, req: EvaluationRequest) -> Result<EvaluationScores, AnalysisError>;
}

#[async_trait]
pub trait HistoryPort: Send + Sync {
    /// Idempotent on `record.id`: a second put replaces the first.
    async fn put(&self, record: &AnalysisRecord) -> Result<(), AnalysisError>;
    async fn get(&self, id: &str) -> Result<AnalysisRecord, AnalysisError>;
    async fn recent(&self, limit: usize) -> Result<Vec<AnalysisRecord>, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineTelemetryEvent {
    AnalysisStarted {
        request_id: String,
        frameworks: usize,
    },
    StageCompleted {
        request_id: String,
        stage: StageName,
        attempts: u32,
        elapsed_ms: u64,
    },
    StageDegraded {
        request_id: String,
        stage: StageName,
        attempts: u32,
        reason: String,
    },
    StageFailed {
        request_id: String,
        stage: StageName,
        reason: String,
    },
    ContentRejected {
        request_id: String,
        scope: SafetyScope,
    },
    AnalysisCancelled {
        request_id: String,
        stage: StageName,
    },
    AnalysisCompleted {
        request_id: String,
        analysis_id: String,
        persisted: bool,
    },
}

pub trait PipelineTelemetryPort: Send + Sync {
    fn on_event(&self, event: PipelineTelemetryEvent);
}

#[derive(Default)]
pub struct NoopTelemetryPort;

impl PipelineTelemetryPort for NoopTelemetryPort {
    fn on_event(&self, _event: PipelineTelemetryEvent) {}
}

/// Forwards pipeline events to `tracing` under the `pipeline` target.
#[derive(Default)]
pub struct TracingTelemetryPort;

impl PipelineTelemetryPort for TracingTelemetryPort {
    fn on_event(&self, event: PipelineTelemetryEvent) {
        match event {
            PipelineTelemetryEvent::AnalysisStarted {
                request_id,
                frameworks,
            } => tracing::info!(
                target: "pipeline",
                request_id = %request_id,
                frameworks = frameworks,
                "analysis_started"
            ),
            PipelineTelemetryEvent::StageCompleted {
                request_id,
                stage,
                attempts,
                elapsed_ms,
            } => tracing::debug!(
                target: "pipeline",
                request_id = %request_id,
                stage = stage.as_str(),
                attempts = attempts,
                elapsed_ms = elapsed_ms,
                "stage_completed"
            ),
            PipelineTelemetryEvent::StageDegraded {
                request_id,
                stage,
                attempts,
                reason,
            } => tracing::warn!(
                target: "pipeline",
                request_id = %request_id,
                stage = stage.as_str(),
                attempts = attempts,
                reason = %reason,
                "stage_degraded"
            ),
            PipelineTelemetryEvent::StageFailed {
                request_id,
                stage,
                reason,
            } => tracing::warn!(
                target: "pipeline",
                request_id = %request_id,
                stage = stage.as_str(),
                reason = %reason,
                "stage_failed"
            ),
            PipelineTelemetryEvent::ContentRejected { request_id, scope } => tracing::info!(
                target: "pipeline",
                request_id = %request_id,
                scope = scope.as_str(),
                "content_rejected"
            ),
            PipelineTelemetryEvent::AnalysisCancelled { request_id, stage } => tracing::info!(
                target: "pipeline",
                request_id = %request_id,
                stage = stage.as_str(),
                "analysis_cancelled"
            ),
            PipelineTelemetryEvent::AnalysisCompleted {
                request_id,
                analysis_id,
                persisted,
            } => tracing::info!(
                target: "pipeline",
                request_id = %request_id,
                analysis_id = %analysis_id,
                persisted = persisted,
                "analysis_completed"
            ),
        }
    }
}
