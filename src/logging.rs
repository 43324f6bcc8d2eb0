use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, bail};
use tracing::Subscriber;
use tracing_appender::{
    non_blocking::{NonBlocking, WorkerGuard},
    rolling::{self, RollingFileAppender},
};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan,
    util::SubscriberInitExt,
};
use uuid::Uuid;

use crate::config::{LoggingConfig, LoggingRotation};

const LOG_FILE_PREFIX: &str = "arbiter.log";
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Holds the file writer open for the life of the process. Every analysis
/// logged under this guard shares its `run_id`.
pub struct LoggingGuard {
    _worker_guard: WorkerGuard,
    run_id: String,
}

impl LoggingGuard {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Outcome of pruning expired rotated files at startup.
#[derive(Debug, Default)]
struct RetentionReport {
    removed: Vec<PathBuf>,
    warnings: Vec<String>,
}

pub fn init_tracing(logging: &LoggingConfig, service_name: &str) -> Result<LoggingGuard> {
    if logging.dir.as_os_str().is_empty() {
        bail!("logging.dir cannot be empty");
    }
    let filter = build_env_filter(&logging.filter)?;

    fs::create_dir_all(&logging.dir)
        .with_context(|| format!("failed to create log directory {}", logging.dir.display()))?;
    let retention = prune_expired_logs(&logging.dir, logging.retention_days, SystemTime::now());

    let (writer, worker_guard) =
        tracing_appender::non_blocking(rolling_appender(&logging.dir, &logging.rotation));

    tracing_subscriber::registry()
        .with(ErrorLayer::default())
        .with(json_file_layer(writer, filter))
        .with(logging.stderr_warn_enabled.then(stderr_warn_layer))
        .try_init()
        .context("failed to install tracing subscriber")?;

    let run_id = Uuid::now_v7().to_string();
    tracing::info!(
        target: "logging",
        run_id = %run_id,
        service = %service_name,
        dir = %logging.dir.display(),
        filter = %logging.filter,
        rotation = ?logging.rotation,
        pruned_files = retention.removed.len(),
        "logging_initialized"
    );
    for warning in &retention.warnings {
        tracing::warn!(target: "logging", warning = %warning, "log_retention_warning");
    }

    Ok(LoggingGuard {
        _worker_guard: worker_guard,
        run_id,
    })
}

fn build_env_filter(filter: &str) -> Result<EnvFilter> {
    if filter.trim().is_empty() {
        bail!("logging.filter cannot be empty");
    }
    EnvFilter::try_new(filter).with_context(|| format!("invalid logging.filter '{filter}'"))
}

fn json_file_layer<S>(writer: NonBlocking, filter: EnvFilter) -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    fmt::layer()
        .json()
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_current_span(true)
        .with_span_list(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter)
        .boxed()
}

fn stderr_warn_layer<S>() -> BoxedLayer<S>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN)
        .boxed()
}

fn rolling_appender(dir: &Path, rotation: &LoggingRotation) -> RollingFileAppender {
    match rotation {
        LoggingRotation::Daily => rolling::daily(dir, LOG_FILE_PREFIX),
        LoggingRotation::Hourly => rolling::hourly(dir, LOG_FILE_PREFIX),
    }
}

/// Deletes `arbiter.log*` files last modified before the retention window.
/// Failures become warnings; startup never stops on a stale log file.
fn prune_expired_logs(dir: &Path, retention_days: usize, now: SystemTime) -> RetentionReport {
    let window = Duration::from_secs((retention_days as u64).saturating_mul(SECONDS_PER_DAY));
    let cutoff = now.checked_sub(window).unwrap_or(SystemTime::UNIX_EPOCH);
    let mut report = RetentionReport::default();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            report
                .warnings
                .push(format!("cannot scan {}: {err}", dir.display()));
            return report;
        }
    };

    for path in entries.filter_map(|entry| entry.ok().map(|entry| entry.path())) {
        let is_log = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }

        match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) if modified <= cutoff => match fs::remove_file(&path) {
                Ok(()) => report.removed.push(path),
                Err(err) => report
                    .warnings
                    .push(format!("cannot remove {}: {err}", path.display())),
            },
            Ok(_) => {}
            Err(err) => report
                .warnings
                .push(format!("cannot read mtime of {}: {err}", path.display())),
        }
    }

    report
}
