use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use arbiter::{
    analysis::{
        AnalysisError, AnalysisPorts, Orchestrator, PipelineConfig,
        error::reasoning_unavailable,
        ports::{
            EmbeddingPort, EmbeddingRequest, EvaluationRequest, EvaluatorPort, HistoryPort,
            NoopTelemetryPort, ReasonerPort, ReasoningRequest, RetrievalRequest, RetrieverPort,
            SafetyPort, SafetyRequest,
        },
        types::{
            EvaluationScores, ReasoningOutput, ReasoningStep, RetrievedPassage, SafetyCategory,
            SafetyVerdict, TradeoffScores,
        },
    },
    history::InMemoryHistoryStore,
    server::{AppState, serve},
};

struct FixedEmbedder;

#[async_trait]
impl EmbeddingPort for FixedEmbedder {
    async fn embed(&self, _req: EmbeddingRequest) -> Result<Vec<f32>, AnalysisError> {
        Ok(vec![0.5, 0.5])
    }
}

struct FixedRetriever;

#[async_trait]
impl RetrieverPort for FixedRetriever {
    async fn retrieve(
        &self,
        _req: RetrievalRequest,
    ) -> Result<Vec<RetrievedPassage>, AnalysisError> {
        Ok(vec![RetrievedPassage {
            text: "Justice as fairness.".to_string(),
            source_id: "rawls".to_string(),
            similarity: 0.8,
            rank: 1,
        }])
    }
}

/// Flags any text containing the marker word as unsafe.
struct MarkerSafety;

#[async_trait]
impl SafetyPort for MarkerSafety {
    async fn classify(&self, req: SafetyRequest) -> Result<SafetyVerdict, AnalysisError> {
        if req.text.contains("FORBIDDEN") {
            Ok(SafetyVerdict::unsafe_because(
                "marker found",
                SafetyCategory::Other,
            ))
        } else {
            Ok(SafetyVerdict::safe("clean"))
        }
    }
}

/// Fails whenever the scenario asks for an outage.
struct MarkerReasoner;

#[async_trait]
impl ReasonerPort for MarkerReasoner {
    async fn reason(&self, req: ReasoningRequest) -> Result<ReasoningOutput, AnalysisError> {
        if req.scenario.contains("OUTAGE") {
            return Err(reasoning_unavailable("model offline"));
        }
        Ok(ReasoningOutput {
            steps: vec![ReasoningStep {
                index: 1,
                description: "Apply the veil of ignorance.".to_string(),
            }],
            outcomes: Vec::new(),
            tradeoffs: TradeoffScores {
                utilitarian_harm: 2.0,
                ..TradeoffScores::default()
            },
            recommendation: "Choose the policy that protects the worst off.".to_string(),
        })
    }
}

struct FixedEvaluator;

#[async_trait]
impl EvaluatorPort for FixedEvaluator {
    async fn score(&self, _req: EvaluationRequest) -> Result<EvaluationScores, AnalysisError> {
        Ok(EvaluationScores {
            context_relevance: 0.9,
            reasoning_coherence: 0.9,
            ethical_coverage: 0.9,
        })
    }
}

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestServer {
    async fn start() -> Self {
        let ports = AnalysisPorts {
            embedding: Arc::new(FixedEmbedder),
            retriever: Arc::new(FixedRetriever),
            safety: Arc::new(MarkerSafety),
            reasoner: Arc::new(MarkerReasoner),
            evaluator: Arc::new(FixedEvaluator),
            history: Arc::new(InMemoryHistoryStore::new()) as Arc<dyn HistoryPort>,
            telemetry: Arc::new(NoopTelemetryPort),
        };
        let orchestrator = Arc::new(Orchestrator::new(ports, PipelineConfig::default()));
        let state = AppState::new(orchestrator, "arbiter-test");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("test server should bind");
        let addr = listener.local_addr().expect("test server addr");
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state, shutdown.clone()));

        Self {
            addr,
            http: reqwest::Client::new(),
            shutdown,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn analyze(&self, body: Value) -> (StatusCode, Value) {
        let response = self
            .http
            .post(self.url("/api/analyze"))
            .json(&body)
            .send()
            .await
            .expect("analyze request should complete");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .expect("get request should complete");
        let status = response.status();
        (status, response.json().await.expect("json body"))
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[tokio::test]
async fn health_reports_service_name() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "arbiter-test");
    assert!(body["timestamp"].as_str().is_some_and(|ts| !ts.is_empty()));
}

#[tokio::test]
async fn analyze_returns_result_that_history_can_fetch() {
    let server = TestServer::start().await;

    let (status, body) = server
        .analyze(json!({
            "scenario": "Should a city ration water equally or by need during a drought?",
            "frameworks": ["utilitarian", "care"]
        }))
        .await;

    assert_eq!(status, StatusCode::OK);
    let analysis_id = body["analysisId"].as_str().expect("analysis id").to_string();
    assert_eq!(body["reasoning"], json!(["Apply the veil of ignorance."]));
    assert_eq!(body["frameworks"], json!(["utilitarian", "care"]));
    assert_eq!(body["contextPassages"], 1);
    assert_eq!(body["tradeoffs"]["utilitarian_harm"], 2.0);
    assert_eq!(body["tradeoffs"]["rights_violation"], 0.0);
    assert!(body["evaluation"].is_object());

    let (status, record) = server.get(&format!("/api/history/{analysis_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["id"], analysis_id);
    assert_eq!(record["safetyStatus"], "verified");

    let (status, listing) = server.get("/api/history").await;
    assert_eq!(status, StatusCode::OK);
    let listing = listing.as_array().expect("history is a json array");
    assert_eq!(listing.len(), 1);
    assert_eq!(listing[0]["id"], analysis_id);
}

#[tokio::test]
async fn caller_header_is_recorded() {
    let server = TestServer::start().await;

    let response = server
        .http
        .post(server.url("/api/analyze"))
        .header("x-caller-id", "ethics-board")
        .json(&json!({"scenario": "Is lying to protect a friend acceptable?"}))
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.expect("json body");
    let analysis_id = body["analysisId"].as_str().expect("analysis id");

    let (_, record) = server.get(&format!("/api/history/{analysis_id}")).await;
    assert_eq!(record["request"]["callerId"], "ethics-board");
}

#[tokio::test]
async fn invalid_requests_are_bad_request() {
    let server = TestServer::start().await;

    let (status, body) = server
        .analyze(json!({"scenario": "", "frameworks": ["utilitarian"]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);
    assert!(body["error"].as_str().is_some());

    let (status, _) = server
        .analyze(json!({"scenario": "A dilemma.", "frameworks": ["astrology"]}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = server
        .http
        .post(server.url("/api/analyze"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request should complete");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unsafe_scenario_is_unprocessable_and_recorded() {
    let server = TestServer::start().await;

    let (status, body) = server
        .analyze(json!({"scenario": "FORBIDDEN request", "frameworks": ["virtue"]}))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["retryable"], false);
    let analysis_id = body["analysisId"].as_str().expect("rejection carries id");

    let (status, record) = server.get(&format!("/api/history/{analysis_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["safetyStatus"], "rejected-input");
}

#[tokio::test]
async fn reasoning_outage_is_service_unavailable() {
    let server = TestServer::start().await;

    let (status, body) = server
        .analyze(json!({"scenario": "OUTAGE scenario", "frameworks": ["care"]}))
        .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retryable"], true);
    assert!(body.get("analysisId").is_none());
}

#[tokio::test]
async fn unknown_history_id_is_not_found() {
    let server = TestServer::start().await;

    let (status, body) = server
        .get("/api/history/0191f3a4-0000-7000-8000-000000000000")
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn history_limit_is_clamped() {
    let server = TestServer::start().await;
    for index in 0..3 {
        let (status, _) = server
            .analyze(json!({"scenario": format!("Dilemma number {index}.")}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, listing) = server.get("/api/history?limit=2").await;
    assert_eq!(listing.as_array().map(Vec::len), Some(2));

    let (_, listing) = server.get("/api/history?limit=0").await;
    assert_eq!(listing.as_array().map(Vec::len), Some(1));

    let (_, listing) = server.get("/api/history").await;
    assert_eq!(listing.as_array().map(Vec::len), Some(3));
}
