use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::analysis::{
    error::{AnalysisError, AnalysisErrorKind},
    types::{PipelineConfig, StageTimeouts},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Embedding,
    Retrieval,
    InputSafety,
    Reasoning,
    OutputSafety,
    Evaluation,
    Persistence,
}

impl StageName {
    pub fn as_str(self) -> &'static str {
        match self {
            StageName::Embedding => "embedding",
            StageName::Retrieval => "retrieval",
            StageName::InputSafety => "input_safety",
            StageName::Reasoning => "reasoning",
            StageName::OutputSafety => "output_safety",
            StageName::Evaluation => "evaluation",
            StageName::Persistence => "persistence",
        }
    }

    /// Error kind reported when this stage times out.
    pub fn unavailable_kind(self) -> AnalysisErrorKind {
        match self {
            StageName::Embedding => AnalysisErrorKind::EmbeddingUnavailable,
            StageName::Retrieval => AnalysisErrorKind::IndexUnavailable,
            StageName::InputSafety | StageName::OutputSafety => {
                AnalysisErrorKind::SafetyUnavailable
            }
            StageName::Reasoning => AnalysisErrorKind::ReasoningUnavailable,
            StageName::Evaluation => AnalysisErrorKind::EvaluationUnavailable,
            StageName::Persistence => AnalysisErrorKind::PersistenceFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Abort,
    Degrade,
    RetryOnceThenDegrade,
}

impl FailurePolicy {
    pub fn max_attempts(self) -> u32 {
        match self {
            FailurePolicy::RetryOnceThenDegrade => 2,
            FailurePolicy::Abort | FailurePolicy::Degrade => 1,
        }
    }

    pub fn is_fatal(self) -> bool {
        matches!(self, FailurePolicy::Abort)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageDescriptor {
    pub name: StageName,
    pub timeout: Duration,
    pub policy: FailurePolicy,
}

/// Ordered stage list consulted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<StageDescriptor>,
    retry_backoff: Duration,
}

impl StagePlan {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let read_policy = if config.retry_read_stages {
            FailurePolicy::RetryOnceThenDegrade
        } else {
            FailurePolicy::Degrade
        };
        let StageTimeouts {
            embedding_ms,
            retrieval_ms,
            input_safety_ms,
            reasoning_ms,
            output_safety_ms,
            evaluation_ms,
            persistence_ms,
        } = config.stage_timeouts;

        let stage = |name, timeout_ms: u64, policy| StageDescriptor {
            name,
            timeout: Duration::from_millis(timeout_ms.max(1)),
            policy,
        };

        Self {
            stages: vec![
                stage(StageName::Embedding, embedding_ms, read_policy),
                stage(StageName::Retrieval, retrieval_ms, read_policy),
                stage(StageName::InputSafety, input_safety_ms, FailurePolicy::Degrade),
                stage(StageName::Reasoning, reasoning_ms, FailurePolicy::Abort),
                stage(StageName::OutputSafety, output_safety_ms, FailurePolicy::Degrade),
                stage(StageName::Evaluation, evaluation_ms, read_policy),
                stage(StageName::Persistence, persistence_ms, FailurePolicy::Degrade),
            ],
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    pub fn stages(&self) -> &[StageDescriptor] {
        &self.stages
    }

    pub fn retry_backoff(&self) -> Duration {
        self.retry_backoff
    }

    pub fn descriptor(&self, name: StageName) -> StageDescriptor {
        self.stages
            .iter()
            .copied()
            .find(|stage| stage.name == name)
            .unwrap_or(StageDescriptor {
                name,
                timeout: Duration::from_millis(StageTimeouts::default().reasoning_ms),
                policy: FailurePolicy::Abort,
            })
    }
}

#[derive(Debug)]
pub enum StageOutcome<T> {
    Completed(T),
    Failed(AnalysisError),
    Cancelled,
}

#[derive(Debug)]
pub struct StageRun<T> {
    pub outcome: StageOutcome<T>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Runs one stage under its timeout, retrying once when the policy allows
/// and the failure is retryable. `cancel` of `None` shields the stage from
/// caller disconnects.
pub async fn run_stage<T, F, Fut>(
    descriptor: StageDescriptor,
    backoff: Duration,
    cancel: Option<&CancellationToken>,
    mut call: F,
) -> StageRun<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AnalysisError>>,
{
    let started_at = Instant::now();
    let max_attempts = descriptor.policy.max_attempts();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let attempt = timeout(descriptor.timeout, call());
        let result = match cancel {
            Some(token) => tokio::select! {
                biased;
                result = attempt => Some(result),
                _ = token.cancelled() => None,
            },
            None => Some(attempt.await),
        };

        let err = match result {
            None => {
                return StageRun {
                    outcome: StageOutcome::Cancelled,
                    attempts,
                    elapsed: started_at.elapsed(),
                };
            }
            Some(Ok(Ok(value))) => {
                return StageRun {
                    outcome: StageOutcome::Completed(value),
                    attempts,
                    elapsed: started_at.elapsed(),
                };
            }
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => AnalysisError::new(
                descriptor.name.unavailable_kind(),
                format!(
                    "{} stage timed out after {}ms",
                    descriptor.name.as_str(),
                    descriptor.timeout.as_millis()
                ),
            )
            .with_retryable(true),
        };

        if !err.retryable || attempts >= max_attempts {
            return StageRun {
                outcome: StageOutcome::Failed(err),
                attempts,
                elapsed: started_at.elapsed(),
            };
        }

        tracing::debug!(
            target: "pipeline",
            stage = descriptor.name.as_str(),
            attempt = attempts,
            error = %err,
            "stage_retry_scheduled"
        );
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        return StageRun {
                            outcome: StageOutcome::Cancelled,
                            attempts,
                            elapsed: started_at.elapsed(),
                        };
                    }
                    _ = sleep(backoff) => {}
                }
            }
            None => sleep(backoff).await,
        }
    }
}
