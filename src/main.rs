use anyhow::Context;
use arbiter::{app, cli::config_path_from_args, config::Config, logging::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = config_path_from_args()?;
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let logging_guard = init_tracing(&config.logging, &config.server.service_name)
        .context("failed to initialize logging")?;
    tracing::info!(
        target: "arbiter",
        run_id = logging_guard.run_id(),
        config = %config_path.display(),
        "arbiter_starting"
    );

    app::run(config).await
}
