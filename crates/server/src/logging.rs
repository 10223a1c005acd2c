//! Structured logging setup.
//!
//! Every event carries `component` and `event` fields. Output is JSON by
//! default so it can be shipped as-is; `CHATRELAY_LOG_FORMAT=pretty` switches
//! to human-readable output for local runs.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";
const LOG_FILE: &str = "chatrelay.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(value) if value.eq_ignore_ascii_case("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

/// Logging options read from `CHATRELAY_LOG_*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Directory for `chatrelay.log`; stdout when unset.
    pub dir: Option<PathBuf>,
    pub filter: String,
    pub format: LogFormat,
    pub run_id: String,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).filter(|value| !value.is_empty());
        Self {
            dir: set("CHATRELAY_LOG_DIR").map(PathBuf::from),
            filter: set("CHATRELAY_LOG_FILTER")
                .or_else(|| set("RUST_LOG"))
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: LogFormat::parse(set("CHATRELAY_LOG_FORMAT").as_deref()),
            run_id: set("CHATRELAY_RUN_ID").unwrap_or_else(default_run_id),
        }
    }

    fn destination(&self) -> String {
        self.dir
            .as_ref()
            .map(|dir| dir.join(LOG_FILE).display().to_string())
            .unwrap_or_else(|| "stdout".to_string())
    }
}

fn default_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("pid-{}-{}", std::process::id(), now)
}

pub struct LoggingHandle {
    pub run_id: String,
    /// Flushes buffered lines on drop; hold it for the life of the process.
    pub guard: WorkerGuard,
}

pub fn init_logging() -> anyhow::Result<LoggingHandle> {
    init_with(LogSettings::from_env())
}

pub fn init_with(settings: LogSettings) -> anyhow::Result<LoggingHandle> {
    let (writer, guard) = match &settings.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, LOG_FILE))
        }
        None => tracing_appender::non_blocking(std::io::stdout()),
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match settings.format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_ansi(settings.dir.is_none())
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .with_writer(writer)
            .json()
            .flatten_event(true)
            .with_file(true)
            .with_line_number(true)
            .with_current_span(true)
            .boxed(),
    };

    // A malformed filter falls back to the default rather than failing startup.
    let (filter, filter_error) = match EnvFilter::try_new(&settings.filter) {
        Ok(filter) => (filter, None),
        Err(e) => (EnvFilter::new(DEFAULT_FILTER), Some(e.to_string())),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()?;

    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %settings.run_id,
        destination = %settings.destination(),
        format = settings.format.as_str(),
        filter = %settings.filter,
    );
    if let Some(error) = filter_error {
        tracing::warn!(
            component = "logging",
            event = "logging.filter_invalid",
            filter = %settings.filter,
            error = %error,
            "Invalid log filter, using default"
        );
    }

    Ok(LoggingHandle {
        run_id: settings.run_id,
        guard,
    })
}
