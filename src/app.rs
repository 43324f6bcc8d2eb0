use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
};
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{
        AnalysisPorts, Orchestrator,
        adapters::{
            InferenceEmbedder, InferenceEvaluator, InferenceReasoner, InferenceSafetyFilter,
            OpenSearchRetriever,
        },
        ports::TracingTelemetryPort,
    },
    config::Config,
    history::build_history_store,
    inference::{InferenceClient, credentials::EnvCredentialProvider},
    server::{self, AppState},
};

/// Wires the configured remote services and history backend into one
/// orchestrator.
pub fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let client = InferenceClient::new(
        config.reliability.clone(),
        Arc::new(EnvCredentialProvider),
    )
    .context("failed to construct inference client")?;
    let services = &config.services;

    let ports = AnalysisPorts {
        embedding: Arc::new(InferenceEmbedder::new(
            client.clone(),
            services.embedding.clone(),
        )),
        retriever: Arc::new(OpenSearchRetriever::new(
            client.clone(),
            services.retriever.profile.clone(),
            services.retriever.index.clone(),
        )),
        safety: Arc::new(InferenceSafetyFilter::new(
            client.clone(),
            services.safety.clone(),
        )),
        reasoner: Arc::new(InferenceReasoner::new(
            client.clone(),
            services.reasoning.clone(),
            config.pipeline.simulate_missing_outcomes,
        )),
        evaluator: Arc::new(InferenceEvaluator::new(client, services.evaluator.clone())),
        history: build_history_store(&config.history),
        telemetry: Arc::new(TracingTelemetryPort),
    };

    Ok(Orchestrator::new(ports, config.pipeline.clone()))
}

pub async fn run(config: Config) -> Result<()> {
    let orchestrator = Arc::new(build_orchestrator(&config)?);
    let state = AppState::new(orchestrator, config.server.service_name.clone());

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    let shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };

    tracing::info!(target: "server", signal = signal_name, "shutdown_requested");
    shutdown.cancel();
    server_task.await.context("server task join failed")??;

    tracing::info!(target: "server", signal = signal_name, "arbiter_stopped");
    Ok(())
}
