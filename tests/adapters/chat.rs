use serde_json::json;

use arbiter::analysis::{
    AnalysisErrorKind,
    adapters::{InferenceEvaluator, InferenceReasoner, InferenceSafetyFilter},
    ports::{
        EvaluationRequest, EvaluatorPort, ReasonerPort, ReasoningRequest, SafetyPort,
        SafetyRequest,
    },
    types::{
        Framework, OutcomeSeverity, ReasoningStep, RetrievedPassage, SafetyCategory, SafetyScope,
    },
};

use crate::support::{MockBackend, chat_reply, client};

const SCENARIO: &str = "A self-driving car must choose between swerving into one pedestrian \
or staying on course toward three.";

fn reasoning_request(frameworks: Vec<Framework>) -> ReasoningRequest {
    ReasoningRequest {
        request_id: "req-r".to_string(),
        scenario: SCENARIO.to_string(),
        frameworks,
        context: vec![RetrievedPassage {
            text: "Do not use persons merely as means.".to_string(),
            source_id: "kant".to_string(),
            similarity: 0.88,
            rank: 1,
        }],
    }
}

#[tokio::test]
async fn safety_filter_reads_json_verdict_in_json_mode() {
    let backend = MockBackend::start(vec![chat_reply(
        r#"{"safe": false, "reason": "depicts graphic violence", "category": "violence"}"#,
    )])
    .await;
    let safety = InferenceSafetyFilter::new(
        client(),
        backend.profile("safety", Some("content-safety")),
    );

    let verdict = safety
        .classify(SafetyRequest {
            request_id: "req-s".to_string(),
            text: SCENARIO.to_string(),
            scope: SafetyScope::Input,
        })
        .await
        .expect("classification should succeed");

    assert!(!verdict.safe);
    assert_eq!(verdict.category, SafetyCategory::Violence);
    assert_eq!(verdict.rationale, "depicts graphic violence");

    let requests = backend.requests();
    assert_eq!(requests[0].path, "/v1/chat/completions");
    assert_eq!(requests[0].body["model"], "content-safety");
    assert_eq!(requests[0].body["temperature"], 0.0);
    assert_eq!(requests[0].body["stream"], false);
    assert_eq!(
        requests[0].body["response_format"],
        json!({"type": "json_object"})
    );
    let user_message = requests[0].body["messages"][1]["content"]
        .as_str()
        .expect("user message text");
    assert!(user_message.contains("self-driving car"));
}

#[tokio::test]
async fn safety_filter_accepts_fenced_safe_verdict() {
    let backend =
        MockBackend::start(vec![chat_reply("```json\n{\"safe\": true}\n```")]).await;
    let safety = InferenceSafetyFilter::new(client(), backend.profile("safety", None));

    let verdict = safety
        .classify(SafetyRequest {
            request_id: "req-s2".to_string(),
            text: "A neutral summary.".to_string(),
            scope: SafetyScope::Output,
        })
        .await
        .expect("classification should succeed");

    assert!(verdict.safe);
    assert_eq!(verdict.category, SafetyCategory::None);
}

#[tokio::test]
async fn safety_filter_outage_is_safety_unavailable() {
    let backend = MockBackend::start(vec![(502, json!({"error": "bad gateway"}))]).await;
    let safety = InferenceSafetyFilter::new(client(), backend.profile("safety", None));

    let err = safety
        .classify(SafetyRequest {
            request_id: "req-s3".to_string(),
            text: SCENARIO.to_string(),
            scope: SafetyScope::Input,
        })
        .await
        .expect_err("502 should fail");

    assert_eq!(err.kind, AnalysisErrorKind::SafetyUnavailable);
}

#[tokio::test]
async fn reasoner_parses_envelope_and_simulates_missing_outcomes() {
    let backend = MockBackend::start(vec![
        chat_reply(
            r#"{
                "steps": [
                    "Identify who is affected.",
                    {"description": "Weigh three lives against one."},
                    "   "
                ],
                "recommendation": "Stay on course and brake.",
                "tradeoffs": {"utilitarian_harm": 12, "deontological_duty": -4, "rights_violation": 7}
            }"#,
        ),
        chat_reply(
            r#"{"outcomes": [
                {"action": "grant_rights", "consequences": "Pedestrians keep priority.", "severity": "high"},
                {"action": "deny_rights", "consequences": "Passengers favored.", "severity": "extreme"}
            ]}"#,
        ),
    ])
    .await;
    let reasoner =
        InferenceReasoner::new(client(), backend.profile("reasoning", Some("nemotron")), true);

    let output = reasoner
        .reason(reasoning_request(vec![
            Framework::Utilitarian,
            Framework::Deontological,
        ]))
        .await
        .expect("reasoning should succeed");

    assert_eq!(
        output.steps,
        vec![
            ReasoningStep {
                index: 1,
                description: "Identify who is affected.".to_string(),
            },
            ReasoningStep {
                index: 2,
                description: "Weigh three lives against one.".to_string(),
            },
        ]
    );
    assert_eq!(output.recommendation, "Stay on course and brake.");
    assert_eq!(output.tradeoffs.utilitarian_harm, 10.0);
    assert_eq!(output.tradeoffs.deontological_duty, -4.0);
    assert_eq!(output.tradeoffs.rights_violation, 0.0);
    assert_eq!(output.tradeoffs.precedent_risk, 0.0);

    assert_eq!(output.outcomes.len(), 2);
    assert_eq!(output.outcomes[0].action, "grant_rights");
    assert_eq!(output.outcomes[0].severity, Some(OutcomeSeverity::High));
    assert_eq!(output.outcomes[1].severity, None);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2, "one reasoning call plus one follow-up");
    let prompt = requests[0].body["messages"][1]["content"]
        .as_str()
        .expect("reasoning prompt text");
    assert!(prompt.contains("utilitarian"));
    assert!(prompt.contains("Do not use persons merely as means."));
}

#[tokio::test]
async fn reasoner_skips_follow_up_when_outcomes_present() {
    let backend = MockBackend::start(vec![chat_reply(
        r#"{
            "steps": ["Consider the duty of care."],
            "recommendation": "Protect the most vulnerable.",
            "outcomes": [{"action": "conditional_rights", "consequences": "Case-by-case review."}]
        }"#,
    )])
    .await;
    let reasoner = InferenceReasoner::new(client(), backend.profile("reasoning", None), true);

    let output = reasoner
        .reason(reasoning_request(vec![Framework::Care]))
        .await
        .expect("reasoning should succeed");

    assert_eq!(output.outcomes.len(), 1);
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn reasoner_keeps_output_when_simulation_fails() {
    let backend = MockBackend::start(vec![
        chat_reply(r#"{"steps": ["One step."], "recommendation": "Act."}"#),
        (500, json!({"error": "overloaded"})),
    ])
    .await;
    let reasoner = InferenceReasoner::new(client(), backend.profile("reasoning", None), true);

    let output = reasoner
        .reason(reasoning_request(vec![Framework::Virtue]))
        .await
        .expect("simulation failure must not fail reasoning");

    assert!(output.outcomes.is_empty());
    assert_eq!(output.steps.len(), 1);
}

#[tokio::test]
async fn reasoner_rejects_unparsable_output() {
    let backend =
        MockBackend::start(vec![chat_reply("I think the car should probably brake.")]).await;
    let reasoner = InferenceReasoner::new(client(), backend.profile("reasoning", None), false);

    let err = reasoner
        .reason(reasoning_request(vec![Framework::Utilitarian]))
        .await
        .expect_err("prose must be malformed");

    assert_eq!(err.kind, AnalysisErrorKind::MalformedReasoningOutput);
    assert!(!err.retryable);
}

#[tokio::test]
async fn reasoner_outage_is_reasoning_unavailable() {
    let backend = MockBackend::start(vec![(503, json!({"error": "loading model"}))]).await;
    let reasoner = InferenceReasoner::new(client(), backend.profile("reasoning", None), false);

    let err = reasoner
        .reason(reasoning_request(vec![Framework::Utilitarian]))
        .await
        .expect_err("503 must fail");

    assert_eq!(err.kind, AnalysisErrorKind::ReasoningUnavailable);
    assert!(err.retryable);
}

fn evaluation_request() -> EvaluationRequest {
    EvaluationRequest {
        request_id: "req-e".to_string(),
        scenario: SCENARIO.to_string(),
        frameworks: vec![Framework::Utilitarian],
        context: Vec::new(),
        steps: vec![ReasoningStep {
            index: 1,
            description: "Count lives.".to_string(),
        }],
        recommendation: "Brake.".to_string(),
    }
}

#[tokio::test]
async fn evaluator_reads_json_scores() {
    let backend = MockBackend::start(vec![chat_reply(
        r#"{"context_relevance": 0.7, "reasoning_coherence": 0.85, "ethical_coverage": 0.6}"#,
    )])
    .await;
    let evaluator = InferenceEvaluator::new(client(), backend.profile("evaluator", None));

    let scores = evaluator
        .score(evaluation_request())
        .await
        .expect("scoring should succeed");

    assert_eq!(scores.context_relevance, 0.7);
    assert_eq!(scores.reasoning_coherence, 0.85);
    assert_eq!(scores.ethical_coverage, 0.6);
}

#[tokio::test]
async fn evaluator_scrapes_prose_and_clamps() {
    let backend = MockBackend::start(vec![chat_reply(
        "Context relevance: 0.8\nReasoning coherence = 0.6\nethical_coverage: 1.4",
    )])
    .await;
    let evaluator = InferenceEvaluator::new(client(), backend.profile("evaluator", None));

    let scores = evaluator
        .score(evaluation_request())
        .await
        .expect("prose scores should be scraped");

    assert_eq!(scores.context_relevance, 0.8);
    assert_eq!(scores.reasoning_coherence, 0.6);
    assert_eq!(scores.ethical_coverage, 1.0);
}

#[tokio::test]
async fn evaluator_reports_missing_dimensions() {
    let backend =
        MockBackend::start(vec![chat_reply(r#"{"context_relevance": 0.5}"#)]).await;
    let evaluator = InferenceEvaluator::new(client(), backend.profile("evaluator", None));

    let err = evaluator
        .score(evaluation_request())
        .await
        .expect_err("missing dimensions should fail");

    assert_eq!(err.kind, AnalysisErrorKind::EvaluationUnavailable);
    assert!(err.message.contains("reasoning_coherence"));
}
