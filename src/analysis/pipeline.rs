use std::{future::Future, sync::Arc};

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{
    error::{AnalysisError, cancelled, content_rejected, malformed_reasoning_output},
    ports::{
        EmbeddingPort, EmbeddingRequest, EvaluationRequest, EvaluatorPort, HistoryPort,
        PipelineTelemetryEvent, PipelineTelemetryPort, ReasonerPort, ReasoningRequest,
        RetrievalRequest, RetrieverPort, SafetyPort, SafetyRequest,
    },
    stage::{StageName, StageOutcome, StagePlan, run_stage},
    types::{
        AnalysisRecord, AnalysisRequest, AnalysisResponse, PipelineConfig, ReasoningOutput,
        ReasoningStep, ResponseFlags, RetrievedPassage, SafetyScope, SafetyStatus,
    },
    validation::{RawAnalysisRequest, parse_request},
};

/// Collaborators the orchestrator drives, one per stage.
#[derive(Clone)]
pub struct AnalysisPorts {
    pub embedding: Arc<dyn EmbeddingPort>,
    pub retriever: Arc<dyn RetrieverPort>,
    pub safety: Arc<dyn SafetyPort>,
    pub reasoner: Arc<dyn ReasonerPort>,
    pub evaluator: Arc<dyn EvaluatorPort>,
    pub history: Arc<dyn HistoryPort>,
    pub telemetry: Arc<dyn PipelineTelemetryPort>,
}

pub struct Orchestrator {
    ports: AnalysisPorts,
    config: PipelineConfig,
    plan: StagePlan,
}

impl Orchestrator {
    pub fn new(ports: AnalysisPorts, config: PipelineConfig) -> Self {
        let plan = StagePlan::from_config(&config);
        Self {
            ports,
            config,
            plan,
        }
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn history(&self) -> Arc<dyn HistoryPort> {
        Arc::clone(&self.ports.history)
    }

    /// Runs one analysis end to end.
    ///
    /// Embedding, retrieval, safety-service and evaluation failures degrade the
    /// response and set flags. Reasoning failures and tripped safety gates end
    /// the run with an error. Once reasoning has produced output, `cancel` only
    /// skips evaluation; the record is still persisted.
    pub async fn analyze(
        &self,
        raw: RawAnalysisRequest,
        cancel: CancellationToken,
    ) -> Result<AnalysisResponse, AnalysisError> {
        let request_id = Uuid::now_v7().to_string();
        let request = parse_request(raw)?;

        self.ports
            .telemetry
            .on_event(PipelineTelemetryEvent::AnalysisStarted {
                request_id: request_id.clone(),
                frameworks: request.frameworks.len(),
            });

        let mut flags = ResponseFlags::default();
        let context = self
            .gather_context(&request_id, &request, &cancel, &mut flags)
            .await?;

        self.check_input(&request_id, &request, &cancel, &mut flags)
            .await?;

        if cancel.is_cancelled() {
            return Err(self.cancelled(&request_id, StageName::Reasoning));
        }
        let output = self
            .reason(&request_id, &request, &context, &cancel)
            .await?;

        let mut record = AnalysisRecord {
            id: Uuid::new_v4().to_string(),
            request: request.clone(),
            steps: output.steps,
            outcomes: output.outcomes,
            tradeoffs: output.tradeoffs.restricted_to(&request.frameworks),
            evaluation: None,
            recommendation: output.recommendation,
            created_at: OffsetDateTime::now_utc(),
            safety_status: SafetyStatus::Verified,
            flags,
            rejection_reason: None,
        };

        self.check_output(&request_id, &mut record).await?;

        if cancel.is_cancelled() {
            record.flags.degraded_evaluation = true;
            self.ports
                .telemetry
                .on_event(PipelineTelemetryEvent::StageDegraded {
                    request_id: request_id.clone(),
                    stage: StageName::Evaluation,
                    attempts: 0,
                    reason: "caller disconnected".to_string(),
                });
        } else {
            let evaluator = Arc::clone(&self.ports.evaluator);
            let evaluation_request = EvaluationRequest {
                request_id: request_id.clone(),
                scenario: request.scenario.clone(),
                frameworks: request.framework_list(),
                context: context.clone(),
                steps: record.steps.clone(),
                recommendation: record.recommendation.clone(),
            };
            let outcome = self
                .execute(&request_id, StageName::Evaluation, Some(&cancel), move || {
                    let evaluator = Arc::clone(&evaluator);
                    let evaluation_request = evaluation_request.clone();
                    async move { evaluator.score(evaluation_request).await }
                })
                .await;
            match outcome {
                StageOutcome::Completed(scores) => record.evaluation = Some(scores.clamped()),
                StageOutcome::Failed(_) | StageOutcome::Cancelled => {
                    record.flags.degraded_evaluation = true;
                }
            }
        }

        record.safety_status = record.flags.safety_status();
        let persisted = self.persist(&request_id, &record).await;
        if !persisted {
            record.flags.persistence_failed = true;
        }

        self.ports
            .telemetry
            .on_event(PipelineTelemetryEvent::AnalysisCompleted {
                request_id,
                analysis_id: record.id.clone(),
                persisted,
            });

        Ok(AnalysisResponse::from_record(&record, context.len()))
    }

    async fn gather_context(
        &self,
        request_id: &str,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        flags: &mut ResponseFlags,
    ) -> Result<Vec<RetrievedPassage>, AnalysisError> {
        let embedder = Arc::clone(&self.ports.embedding);
        let embedding_request = EmbeddingRequest {
            request_id: request_id.to_string(),
            text: request.scenario.clone(),
        };
        let embedding = match self
            .execute(request_id, StageName::Embedding, Some(cancel), move || {
                let embedder = Arc::clone(&embedder);
                let embedding_request = embedding_request.clone();
                async move { embedder.embed(embedding_request).await }
            })
            .await
        {
            StageOutcome::Completed(vector) if !vector.is_empty() => vector,
            StageOutcome::Completed(_) | StageOutcome::Failed(_) => {
                flags.degraded_retrieval = true;
                return Ok(Vec::new());
            }
            StageOutcome::Cancelled => return Err(self.cancelled_error(StageName::Embedding)),
        };

        let retriever = Arc::clone(&self.ports.retriever);
        let retrieval_request = RetrievalRequest {
            request_id: request_id.to_string(),
            embedding,
            k: self.config.top_k,
            min_similarity: self.config.min_similarity,
        };
        match self
            .execute(request_id, StageName::Retrieval, Some(cancel), move || {
                let retriever = Arc::clone(&retriever);
                let retrieval_request = retrieval_request.clone();
                async move { retriever.retrieve(retrieval_request).await }
            })
            .await
        {
            StageOutcome::Completed(passages) => Ok(passages),
            StageOutcome::Failed(_) => {
                flags.degraded_retrieval = true;
                Ok(Vec::new())
            }
            StageOutcome::Cancelled => Err(self.cancelled_error(StageName::Retrieval)),
        }
    }

    async fn check_input(
        &self,
        request_id: &str,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
        flags: &mut ResponseFlags,
    ) -> Result<(), AnalysisError> {
        let safety = Arc::clone(&self.ports.safety);
        let safety_request = SafetyRequest {
            request_id: request_id.to_string(),
            text: request.scenario.clone(),
            scope: SafetyScope::Input,
        };
        let verdict = match self
            .execute(request_id, StageName::InputSafety, Some(cancel), move || {
                let safety = Arc::clone(&safety);
                let safety_request = safety_request.clone();
                async move { safety.classify(safety_request).await }
            })
            .await
        {
            StageOutcome::Completed(verdict) => verdict,
            StageOutcome::Failed(_) => {
                flags.unverified_input = true;
                return Ok(());
            }
            StageOutcome::Cancelled => return Err(self.cancelled_error(StageName::InputSafety)),
        };

        if verdict.safe {
            return Ok(());
        }

        self.ports
            .telemetry
            .on_event(PipelineTelemetryEvent::ContentRejected {
                request_id: request_id.to_string(),
                scope: SafetyScope::Input,
            });
        let mut record = AnalysisRecord::rejected_input(
            Uuid::new_v4().to_string(),
            request.clone(),
            &verdict,
            OffsetDateTime::now_utc(),
        );
        record.flags = *flags;
        self.persist(request_id, &record).await;

        Err(content_rejected(format!(
            "scenario rejected by safety filter: {}",
            verdict.rationale
        ))
        .with_analysis_id(record.id))
    }

    async fn reason(
        &self,
        request_id: &str,
        request: &AnalysisRequest,
        context: &[RetrievedPassage],
        cancel: &CancellationToken,
    ) -> Result<ReasoningOutput, AnalysisError> {
        let reasoner = Arc::clone(&self.ports.reasoner);
        let reasoning_request = ReasoningRequest {
            request_id: request_id.to_string(),
            scenario: request.scenario.clone(),
            frameworks: request.framework_list(),
            context: context.to_vec(),
        };
        let mut output = match self
            .execute(request_id, StageName::Reasoning, Some(cancel), move || {
                let reasoner = Arc::clone(&reasoner);
                let reasoning_request = reasoning_request.clone();
                async move { reasoner.reason(reasoning_request).await }
            })
            .await
        {
            StageOutcome::Completed(output) => output,
            StageOutcome::Failed(err) => return Err(err),
            StageOutcome::Cancelled => return Err(self.cancelled_error(StageName::Reasoning)),
        };

        output.recommendation = output.recommendation.trim().to_string();
        output.steps = output
            .steps
            .into_iter()
            .filter(|step| !step.description.trim().is_empty())
            .enumerate()
            .map(|(position, step)| ReasoningStep {
                index: position as u32 + 1,
                description: step.description,
            })
            .collect();
        if output.steps.is_empty() || output.recommendation.is_empty() {
            return Err(malformed_reasoning_output(
                "reasoning produced no steps or an empty recommendation",
            ));
        }
        Ok(output)
    }

    async fn check_output(
        &self,
        request_id: &str,
        record: &mut AnalysisRecord,
    ) -> Result<(), AnalysisError> {
        let safety = Arc::clone(&self.ports.safety);
        let gate_text = ReasoningOutput {
            steps: record.steps.clone(),
            outcomes: record.outcomes.clone(),
            tradeoffs: record.tradeoffs,
            recommendation: record.recommendation.clone(),
        }
        .gate_text();
        let safety_request = SafetyRequest {
            request_id: request_id.to_string(),
            text: gate_text,
            scope: SafetyScope::Output,
        };
        let verdict = match self
            .execute(request_id, StageName::OutputSafety, None, move || {
                let safety = Arc::clone(&safety);
                let safety_request = safety_request.clone();
                async move { safety.classify(safety_request).await }
            })
            .await
        {
            StageOutcome::Completed(verdict) => verdict,
            StageOutcome::Failed(_) | StageOutcome::Cancelled => {
                record.flags.unverified_output = true;
                return Ok(());
            }
        };

        if verdict.safe {
            return Ok(());
        }

        self.ports
            .telemetry
            .on_event(PipelineTelemetryEvent::ContentRejected {
                request_id: request_id.to_string(),
                scope: SafetyScope::Output,
            });
        let suppressed = record.clone().suppressed(&verdict);
        self.persist(request_id, &suppressed).await;
        *record = suppressed;

        Err(
            content_rejected("the generated analysis was withheld by the output safety filter")
                .with_analysis_id(record.id.clone()),
        )
    }

    async fn persist(&self, request_id: &str, record: &AnalysisRecord) -> bool {
        let history = Arc::clone(&self.ports.history);
        let record = record.clone();
        let outcome = self
            .execute(request_id, StageName::Persistence, None, move || {
                let history = Arc::clone(&history);
                let record = record.clone();
                async move { history.put(&record).await }
            })
            .await;
        matches!(outcome, StageOutcome::Completed(()))
    }

    async fn execute<T, F, Fut>(
        &self,
        request_id: &str,
        name: StageName,
        cancel: Option<&CancellationToken>,
        call: F,
    ) -> StageOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AnalysisError>>,
    {
        let descriptor = self.plan.descriptor(name);
        let run = run_stage(descriptor, self.plan.retry_backoff(), cancel, call).await;

        let event = match &run.outcome {
            StageOutcome::Completed(_) => PipelineTelemetryEvent::StageCompleted {
                request_id: request_id.to_string(),
                stage: name,
                attempts: run.attempts,
                elapsed_ms: run.elapsed.as_millis() as u64,
            },
            StageOutcome::Failed(err) if descriptor.policy.is_fatal() => {
                PipelineTelemetryEvent::StageFailed {
                    request_id: request_id.to_string(),
                    stage: name,
                    reason: err.to_string(),
                }
            }
            StageOutcome::Failed(err) => PipelineTelemetryEvent::StageDegraded {
                request_id: request_id.to_string(),
                stage: name,
                attempts: run.attempts,
                reason: err.to_string(),
            },
            StageOutcome::Cancelled => PipelineTelemetryEvent::AnalysisCancelled {
                request_id: request_id.to_string(),
                stage: name,
            },
        };
        self.ports.telemetry.on_event(event);
        run.outcome
    }

    fn cancelled(&self, request_id: &str, stage: StageName) -> AnalysisError {
        self.ports
            .telemetry
            .on_event(PipelineTelemetryEvent::AnalysisCancelled {
                request_id: request_id.to_string(),
                stage,
            });
        self.cancelled_error(stage)
    }

    fn cancelled_error(&self, stage: StageName) -> AnalysisError {
        cancelled(format!("caller disconnected before {} completed", stage.as_str()))
    }
}
