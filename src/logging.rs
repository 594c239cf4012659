use serde::Deserialize;
use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::VanatuError;

const DEFAULT_MAX_LOG_FILES: usize = 5;
const LOG_FILE_PREFIX: &str = "vanatu";

fn default_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    DEFAULT_MAX_LOG_FILES
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, colored console output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Also write daily rolling log files here
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            directory: None,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            max_files: DEFAULT_MAX_LOG_FILES,
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Create the log directory and a non-blocking rolling writer into it.
    ///
    /// The returned guard must live as long as logging should be flushed.
    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard), VanatuError> {
        std::fs::create_dir_all(&self.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(self.rotation.clone())
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| {
                VanatuError::ConfigError(format!(
                    "Failed to create log file in {}: {}",
                    self.log_directory.display(),
                    e
                ))
            })?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Install the global subscriber: env filter, console layer and optional file layer.
pub fn setup_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, VanatuError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            VanatuError::ConfigError(format!("Invalid log level '{}': {}", config.level, e))
        })?;

    let console = match config.format {
        LogFormat::Pretty => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let (file_layer, guard) = match &config.directory {
        Some(dir) => {
            let (writer, guard) = FileLogger::new(dir.clone())
                .with_max_files(config.max_files)
                .setup_file_logging()?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()
        .map_err(|e| VanatuError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}
