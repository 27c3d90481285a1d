use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// File that collects every error-level event when error persistence is enabled.
pub const ERROR_LOG_FILE: &str = "pocketstream.errors.log";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Append error-level events to [`ERROR_LOG_FILE`] in `error_log_dir`.
    pub persist_errors: bool,
    /// Directory for the error log; the working directory when `None`.
    pub error_log_dir: Option<PathBuf>,
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("POCKETSTREAM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

pub(crate) fn error_log_writer(dir: &Path) -> Result<RollingFileAppender, String> {
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(ERROR_LOG_FILE)
        .build(dir)
        .map_err(|e| e.to_string())
}

/// Plain-text layer that appends every error-level event to `writer`.
pub(crate) fn persisted_error_layer<S>(writer: RollingFileAppender) -> impl Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(writer)
        .with_filter(LevelFilter::ERROR)
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `POCKETSTREAM_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `POCKETSTREAM_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs are emitted to stdout in a human-readable console format.
/// - `RUST_LOG`: optional filter override.
///
/// A failure to open the error log is reported as a warning and otherwise ignored.
pub fn init_observability(config: &ObservabilityConfig) {
    INIT.get_or_init(|| {
        let mut error_log_failure = None;
        let error_layer = if config.persist_errors {
            let dir = config
                .error_log_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("."));
            match error_log_writer(&dir) {
                Ok(writer) => Some(persisted_error_layer(writer)),
                Err(err) => {
                    error_log_failure = Some((dir.join(ERROR_LOG_FILE), err));
                    None
                }
            }
        } else {
            None
        };

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("POCKETSTREAM_JSON_LOG_PATH") {
            let path = PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("pocketstream.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer)
                .with_filter(env_filter);
            let _ = tracing_subscriber::registry()
                .with(error_layer)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout)
                .with_filter(env_filter);
            let _ = tracing_subscriber::registry()
                .with(error_layer)
                .with(console_layer)
                .try_init();
        }

        if let Some((path, err)) = error_log_failure {
            tracing::warn!(
                event = "observability.error_log_unavailable",
                domain = "observability",
                path = %path.display(),
                error = %err
            );
        }
    });
}
