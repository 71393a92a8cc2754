use std::{
    fs::{self, OpenOptions},
    io::{self, IsTerminal},
    path::{Path, PathBuf},
    str::FromStr,
};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt,
    prelude::*,
};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level {0:?}, expected one of debug, info, warn or error")]
    InvalidLevel(String),

    #[error("unable to open log file {path:?}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a global tracing subscriber was already installed")]
    AlreadyInstalled,
}

/// Parse a configured log level. `warning` is accepted as an alias of `warn`.
pub fn parse_level(level: &str) -> Result<LevelFilter, TelemetryError> {
    let normalized = level.trim().to_ascii_lowercase();

    match normalized.as_str() {
        "" => Ok(LevelFilter::INFO),
        "warning" => Ok(LevelFilter::WARN),
        "debug" | "info" | "warn" | "error" => LevelFilter::from_str(&normalized)
            .map_err(|_| TelemetryError::InvalidLevel(level.to_string())),
        _ => Err(TelemetryError::InvalidLevel(level.to_string())),
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    level: LevelFilter,
    quiet: bool,
    log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            quiet: false,
            log_file: None,
        }
    }
}

impl TelemetryConfig {
    pub fn with_level(self, level: LevelFilter) -> Self {
        Self { level, ..self }
    }

    /// Only print errors to the console. The log file still receives everything.
    pub fn quiet(self, quiet: bool) -> Self {
        Self { quiet, ..self }
    }

    pub fn with_log_file<P: Into<PathBuf>>(self, path: P) -> Self {
        Self {
            log_file: Some(path.into()),
            ..self
        }
    }
}

/// Keeps the background log file writer alive. Dropping it flushes pending lines.
pub struct TelemetryGuard {
    _file_writer: Option<WorkerGuard>,
}

pub fn install(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let TelemetryConfig {
        level,
        quiet,
        log_file,
    } = config;

    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(level.into())
            .parse_lossy("")
    });

    let (file_layer, file_guard) = match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(writer);

            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_filter = if quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::TRACE
    };

    let console_layer = fmt::layer()
        .compact()
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(ErrorLayer::default())
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|_| TelemetryError::AlreadyInstalled)?;

    Ok(TelemetryGuard {
        _file_writer: file_guard,
    })
}

fn open_log_file(path: &Path) -> Result<fs::File, TelemetryError> {
    let open = || {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        OpenOptions::new().create(true).append(true).open(path)
    };

    open().map_err(|source| TelemetryError::LogFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Run `operation` inside the span every event of one command is recorded under. A failure is
/// logged before it's returned.
pub fn with_root_span<T, E>(
    name: &'static str,
    command: &str,
    operation: impl FnOnce() -> Result<T, E>,
) -> Result<T, E>
where
    E: std::fmt::Debug,
{
    let span = tracing::info_span!("root", app = name, command);
    let result = span.in_scope(operation);

    if let Err(error) = &result {
        span.in_scope(|| tracing::error!("{error:?}"));
    }

    result
}

pub fn install_error_handler() {
    let _ = color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install();
}
