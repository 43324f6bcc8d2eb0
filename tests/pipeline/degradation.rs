use std::time::Duration;

use arbiter::analysis::{
    AnalysisErrorKind, RawAnalysisRequest,
    error::{
        embedding_unavailable, evaluation_unavailable, index_unavailable, reasoning_unavailable,
        safety_unavailable,
    },
    ports::{HistoryPort, PipelineTelemetryEvent},
    stage::StageName,
    types::{ReasoningOutput, SafetyStatus},
};
use tokio_util::sync::CancellationToken;

use crate::support::{Harness, count, fast_config, reasoning_output};

const SCENARIO: &str = "A hospital must decide whether to share anonymized patient data \
with a research consortium without explicit consent.";

#[tokio::test]
async fn embedding_failure_retries_once_then_degrades_retrieval() {
    let built = Harness {
        embedding: Err(embedding_unavailable("connection refused")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("embedding failure should degrade, not fail");

    assert!(response.flags.degraded_retrieval);
    assert_eq!(response.context_passages, 0);
    assert_eq!(count(&built.embed_calls), 2);
    assert_eq!(count(&built.retrieve_calls), 0);
    assert_eq!(built.reasoner_context(), Some(0));
    assert!(!response.reasoning.is_empty());
}

#[tokio::test]
async fn index_failure_degrades_retrieval_with_empty_context() {
    let built = Harness {
        retrieval: Err(index_unavailable("index red")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["virtue"]), CancellationToken::new())
        .await
        .expect("index failure should degrade");

    assert!(response.flags.degraded_retrieval);
    assert_eq!(count(&built.retrieve_calls), 2);
    assert_eq!(built.reasoner_context(), Some(0));
}

#[tokio::test]
async fn non_retryable_read_failure_is_not_retried() {
    let built = Harness {
        embedding: Err(embedding_unavailable("bad credentials").with_retryable(false)),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("run should degrade");

    assert!(response.flags.degraded_retrieval);
    assert_eq!(count(&built.embed_calls), 1);
}

#[tokio::test]
async fn retries_are_disabled_by_config() {
    let built = Harness {
        embedding: Err(embedding_unavailable("connection refused")),
        config: arbiter::analysis::PipelineConfig {
            retry_read_stages: false,
            ..fast_config()
        },
        ..Harness::default()
    }
    .build();

    built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("run should degrade");

    assert_eq!(count(&built.embed_calls), 1);
}

#[tokio::test]
async fn safety_service_outage_marks_input_unverified() {
    let built = Harness {
        input_safety: Err(safety_unavailable("guardrail offline")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("safety outage should degrade");

    assert!(response.flags.unverified_input);
    assert_eq!(count(&built.reason_calls), 1);

    let record = built
        .history
        .get(&response.analysis_id)
        .await
        .expect("record should be persisted");
    assert_eq!(record.safety_status, SafetyStatus::UnverifiedInput);
}

#[tokio::test]
async fn both_safety_outages_record_combined_status() {
    let built = Harness {
        input_safety: Err(safety_unavailable("guardrail offline")),
        output_safety: Err(safety_unavailable("guardrail offline")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("safety outages should degrade");

    assert!(response.flags.unverified_input);
    assert!(response.flags.unverified_output);
    let record = built
        .history
        .get(&response.analysis_id)
        .await
        .expect("record should be persisted");
    assert_eq!(record.safety_status, SafetyStatus::Unverified);
}

#[tokio::test]
async fn output_safety_outage_marks_output_unverified() {
    let built = Harness {
        output_safety: Err(safety_unavailable("guardrail offline")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("output safety outage should degrade");

    assert!(response.flags.unverified_output);
    assert!(!response.reasoning.is_empty());
}

#[tokio::test]
async fn evaluator_failure_leaves_evaluation_empty() {
    let built = Harness {
        evaluation: Err(evaluation_unavailable("judge overloaded")),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("evaluator failure should degrade");

    assert!(response.evaluation.is_none());
    assert!(response.flags.degraded_evaluation);
    assert_eq!(count(&built.evaluate_calls), 2);

    let body = serde_json::to_value(&response).expect("response serializes");
    assert!(body["evaluation"].is_null());
}

#[tokio::test]
async fn reasoning_timeout_is_fatal_and_persists_nothing() {
    let mut config = fast_config();
    config.stage_timeouts.reasoning_ms = 50;
    let built = Harness {
        reasoning_delay: Duration::from_secs(5),
        config,
        ..Harness::default()
    }
    .build();

    let err = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect_err("reasoning timeout must fail the run");

    assert_eq!(err.kind, AnalysisErrorKind::ReasoningUnavailable);
    assert!(err.retryable);
    assert!(err.analysis_id.is_none());
    assert_eq!(count(&built.reason_calls), 1, "reasoning is never retried");
    assert!(built.history.is_empty().await);
}

#[tokio::test]
async fn reasoning_error_is_not_retried() {
    let built = Harness {
        reasoning: Err(reasoning_unavailable("model crashed")),
        ..Harness::default()
    }
    .build();

    let err = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect_err("reasoning failure must fail the run");

    assert_eq!(err.kind, AnalysisErrorKind::ReasoningUnavailable);
    assert_eq!(count(&built.reason_calls), 1);
    assert_eq!(count(&built.evaluate_calls), 0);
    assert!(built.history.is_empty().await);
    assert!(built.telemetry.snapshot().iter().any(|event| matches!(
        event,
        PipelineTelemetryEvent::StageFailed {
            stage: StageName::Reasoning,
            ..
        }
    )));
}

#[tokio::test]
async fn empty_reasoning_is_malformed() {
    let built = Harness {
        reasoning: Ok(ReasoningOutput {
            steps: Vec::new(),
            ..reasoning_output()
        }),
        ..Harness::default()
    }
    .build();

    let err = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect_err("empty steps must fail");

    assert_eq!(err.kind, AnalysisErrorKind::MalformedReasoningOutput);
    assert!(built.history.is_empty().await);
}

#[tokio::test]
async fn persistence_failure_still_returns_the_analysis() {
    let built = Harness {
        failing_history: true,
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("persistence failure should not fail the run");

    assert!(response.flags.persistence_failed);
    assert!(!response.reasoning.is_empty());
    assert!(built.telemetry.snapshot().iter().any(|event| matches!(
        event,
        PipelineTelemetryEvent::AnalysisCompleted {
            persisted: false,
            ..
        }
    )));
}

#[tokio::test]
async fn persistence_timeout_reports_unconfirmed_write() {
    let built = Harness {
        history_delay: Duration::from_millis(800),
        ..Harness::default()
    }
    .build();

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), CancellationToken::new())
        .await
        .expect("slow persistence should not fail the run");
    assert!(response.flags.persistence_failed);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let stored = built
        .history
        .get(&response.analysis_id)
        .await
        .expect("the detached write lands after the flag was raised");
    assert_eq!(stored.id, response.analysis_id);
}

#[tokio::test]
async fn cancellation_during_reasoning_ends_run_without_record() {
    let built = Harness {
        reasoning_delay: Duration::from_secs(5),
        ..Harness::default()
    }
    .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), cancel)
        .await
        .expect_err("cancelled run must fail");

    assert_eq!(err.kind, AnalysisErrorKind::Cancelled);
    assert!(built.history.is_empty().await);
}

#[tokio::test]
async fn cancellation_during_evaluation_still_persists_record() {
    let built = Harness {
        evaluation_delay: Duration::from_secs(5),
        ..Harness::default()
    }
    .build();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let response = built
        .orchestrator
        .analyze(RawAnalysisRequest::new(SCENARIO, &["care"]), cancel)
        .await
        .expect("late cancellation keeps the analysis");

    assert!(response.evaluation.is_none());
    assert!(response.flags.degraded_evaluation);
    assert_eq!(built.history.len().await, 1);
    built
        .history
        .get(&response.analysis_id)
        .await
        .expect("record should be persisted after disconnect");
}
