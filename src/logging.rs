//! Structured JSON logging.
//!
//! Events always go to a size-rotated file under the logs directory when
//! one is given. They are mirrored to stderr only when `STOCKROOM_LOG` is
//! set, so command output stays clean by default.

use std::path::{Path, PathBuf};

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, AppResult};

pub const ENV_FILTER: &str = "STOCKROOM_LOG";
pub const ENV_MAX_SIZE_BYTES: &str = "STOCKROOM_LOG_MAX_SIZE_BYTES";
pub const ENV_MAX_FILES: &str = "STOCKROOM_LOG_MAX_FILES";
pub const DEFAULT_FILTER: &str = "stockroom=info,reqwest=warn,sqlx=warn";
pub const DEFAULT_MAX_SIZE_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_MAX_FILES: usize = 5;
pub const LOG_FILE_NAME: &str = "stockroom.log";

/// Keeps the file writer alive. Dropping it flushes buffered lines, so
/// hold it until the program is about to exit.
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSinkSettings {
    pub path: PathBuf,
    pub max_size_bytes: usize,
    pub max_files: usize,
}

impl FileSinkSettings {
    /// Sink settings for `logs_dir`, with limits read through `lookup`.
    /// Unparseable or zero limits fall back to the defaults.
    pub fn from_lookup<F>(logs_dir: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse = |key: &str, default: usize| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<usize>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(default)
        };
        Self {
            path: logs_dir.join(LOG_FILE_NAME),
            max_size_bytes: parse(ENV_MAX_SIZE_BYTES, DEFAULT_MAX_SIZE_BYTES),
            max_files: parse(ENV_MAX_FILES, DEFAULT_MAX_FILES),
        }
    }
}

#[cfg(unix)]
fn rotating_writer(settings: &FileSinkSettings) -> FileRotate<AppendCount> {
    FileRotate::new(
        &settings.path,
        AppendCount::new(settings.max_files),
        ContentLimit::Bytes(settings.max_size_bytes),
        Compression::None,
        None,
    )
}

#[cfg(not(unix))]
fn rotating_writer(settings: &FileSinkSettings) -> FileRotate<AppendCount> {
    FileRotate::new(
        &settings.path,
        AppendCount::new(settings.max_files),
        ContentLimit::Bytes(settings.max_size_bytes),
        Compression::None,
    )
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_FILTER).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Safe to call more than once; later calls
/// leave the first subscriber in place.
pub fn init(logs_dir: Option<&Path>) -> AppResult<LogGuard> {
    let _ = tracing_log::LogTracer::init();

    let mut file_guard = None;
    let file_layer = match logs_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "create_logs_dir")
                    .with_context("path_hash", crate::security::hash_path(dir))
            })?;
            let settings = FileSinkSettings::from_lookup(dir, |key| std::env::var(key).ok());
            let (writer, guard) = tracing_appender::non_blocking(rotating_writer(&settings));
            file_guard = Some(guard);
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_ansi(false)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(writer),
            )
        }
        None => None,
    };

    let stderr_layer = std::env::var_os(ENV_FILTER).map(|_| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
    Ok(LogGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let settings = FileSinkSettings::from_lookup(Path::new("/tmp/logs"), lookup(&[]));
        assert_eq!(settings.path, Path::new("/tmp/logs").join(LOG_FILE_NAME));
        assert_eq!(settings.max_size_bytes, DEFAULT_MAX_SIZE_BYTES);
        assert_eq!(settings.max_files, DEFAULT_MAX_FILES);
    }

    #[test]
    fn env_limits_override_defaults() {
        let settings = FileSinkSettings::from_lookup(
            Path::new("/tmp/logs"),
            lookup(&[(ENV_MAX_SIZE_BYTES, "1024"), (ENV_MAX_FILES, "2")]),
        );
        assert_eq!(settings.max_size_bytes, 1024);
        assert_eq!(settings.max_files, 2);
    }

    #[test]
    fn invalid_limits_fall_back() {
        let settings = FileSinkSettings::from_lookup(
            Path::new("/tmp/logs"),
            lookup(&[(ENV_MAX_SIZE_BYTES, "lots"), (ENV_MAX_FILES, "0")]),
        );
        assert_eq!(settings.max_size_bytes, DEFAULT_MAX_SIZE_BYTES);
        assert_eq!(settings.max_files, DEFAULT_MAX_FILES);
    }
}
