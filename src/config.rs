use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

pub const CONFIG_FILE_NAME: &str = "stockroom.json";
pub const DEFAULT_BUCKET: &str = "items";
pub const DEFAULT_ITEMS_TABLE: &str = "items";
pub const DEFAULT_MOVEMENTS_TABLE: &str = "movements";
pub const DEFAULT_STORAGE_PREFIX: &str = "public";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const ENV_URL: &str = "STOCKROOM_URL";
const ENV_ANON_KEY: &str = "STOCKROOM_ANON_KEY";
const ENV_BACKEND: &str = "STOCKROOM_BACKEND";
const ENV_BUCKET: &str = "STOCKROOM_BUCKET";
const ENV_DATA_DIR: &str = "STOCKROOM_DATA_DIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Rest,
    Local,
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(BackendKind::Rest),
            "local" => Ok(BackendKind::Local),
            other => Err(AppError::new("CONFIG/INVALID", "Unknown backend kind")
                .with_context("backend", other.to_string())),
        }
    }
}

/// Values read from `stockroom.json`. Every field is optional so the file
/// only needs to carry what differs from the defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub backend: Option<BackendKind>,
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub bucket: Option<String>,
    pub items_table: Option<String>,
    pub movements_table: Option<String>,
    pub storage_prefix: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendKind,
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub bucket: String,
    pub items_table: String,
    pub movements_table: String,
    pub storage_prefix: String,
    pub timeout: Duration,
    pub data_dir: PathBuf,
}

#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub backend: Option<BackendKind>,
}

impl Config {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Local,
            url: None,
            anon_key: None,
            bucket: DEFAULT_BUCKET.to_string(),
            items_table: DEFAULT_ITEMS_TABLE.to_string(),
            movements_table: DEFAULT_MOVEMENTS_TABLE.to_string(),
            storage_prefix: DEFAULT_STORAGE_PREFIX.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            data_dir: data_dir.into(),
        }
    }

    /// Resolve configuration: defaults, then `stockroom.json` in the data
    /// dir, then environment, then explicit overrides.
    pub fn load(overrides: Overrides) -> AppResult<Self> {
        let data_dir = match overrides.data_dir.clone() {
            Some(dir) => dir,
            None => match std::env::var(ENV_DATA_DIR) {
                Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
                _ => default_data_dir()?,
            },
        };

        let mut config = Config::with_data_dir(&data_dir);
        config.backend = implied_backend(|key| std::env::var(key).ok());
        if let Some(file) = read_file_config(&data_dir.join(CONFIG_FILE_NAME))? {
            config.apply_file(file);
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        if let Some(kind) = overrides.backend {
            config.backend = kind;
        }
        config.validate()?;

        tracing::debug!(
            target: "stockroom",
            event = "config_loaded",
            backend = ?config.backend,
            bucket = config.bucket.as_str(),
            data_dir = %config.data_dir.display()
        );
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(kind) = file.backend {
            self.backend = kind;
        }
        if file.url.is_some() {
            self.url = file.url;
        }
        if file.anon_key.is_some() {
            self.anon_key = file.anon_key;
        }
        if let Some(bucket) = file.bucket {
            self.bucket = bucket;
        }
        if let Some(table) = file.items_table {
            self.items_table = table;
        }
        if let Some(table) = file.movements_table {
            self.movements_table = table;
        }
        if let Some(prefix) = file.storage_prefix {
            self.storage_prefix = prefix;
        }
        if let Some(secs) = file.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
    }

    fn apply_env<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL).filter(|v| !v.trim().is_empty()) {
            self.url = Some(url);
        }
        if let Some(key) = lookup(ENV_ANON_KEY).filter(|v| !v.trim().is_empty()) {
            self.anon_key = Some(key);
        }
        if let Some(bucket) = lookup(ENV_BUCKET).filter(|v| !v.trim().is_empty()) {
            self.bucket = bucket;
        }
        if let Some(kind) = lookup(ENV_BACKEND).filter(|v| !v.trim().is_empty()) {
            self.backend = kind.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.backend == BackendKind::Rest {
            let url = self.url.as_deref().map(str::trim).unwrap_or_default();
            if url.is_empty() {
                return Err(AppError::new(
                    "CONFIG/INVALID",
                    "A backend URL is required for the rest backend",
                )
                .with_context("env", ENV_URL));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(AppError::new("CONFIG/INVALID", "Backend URL must be http(s)")
                    .with_context("url", url.to_string()));
            }
            if self.anon_key.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                return Err(AppError::new(
                    "CONFIG/INVALID",
                    "An anon key is required for the rest backend",
                )
                .with_context("env", ENV_ANON_KEY));
            }
        }
        for (field, value) in [
            ("bucket", &self.bucket),
            ("items_table", &self.items_table),
            ("movements_table", &self.movements_table),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::new("CONFIG/INVALID", "Value must not be empty")
                    .with_context("field", field));
            }
        }
        Ok(())
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn local_db_path(&self) -> PathBuf {
        self.data_dir.join("stockroom.sqlite3")
    }

    pub fn local_storage_root(&self) -> PathBuf {
        self.data_dir.join("storage")
    }
}

/// A non-blank `STOCKROOM_URL` selects the rest backend unless the config
/// file or `STOCKROOM_BACKEND` says otherwise.
fn implied_backend<F>(lookup: F) -> BackendKind
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(ENV_URL) {
        Some(url) if !url.trim().is_empty() => BackendKind::Rest,
        _ => BackendKind::Local,
    }
}

fn default_data_dir() -> AppResult<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| std::env::current_dir().ok())
        .ok_or_else(|| {
            AppError::new(
                "CONFIG/INVALID",
                "Failed to resolve application data directory",
            )
        })?;
    Ok(base.join("stockroom"))
}

fn read_file_config(path: &Path) -> AppResult<Option<FileConfig>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let parsed: FileConfig = serde_json::from_str(&raw).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "read_config")
                    .with_context("path", path.display().to_string())
            })?;
            Ok(Some(parsed))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(AppError::from(err).with_context("operation", "read_config")),
    }
}
