use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IoError;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;

/// Error shared by the library and the CLI. `message` is what users see;
/// `code` and `context` are for logs and callers that branch on failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Code for errors that carry no code of their own.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Replace the user-facing message, keeping code, context and cause.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn log_with_event(&self, event: &'static str) {
        tracing::error!(
            target: "stockroom",
            event = event,
            code = self.code.as_str(),
            message = self.message.as_str(),
            context = ?self.context,
        );
    }
}

/// Renders only the message; codes and context belong in the logs.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Flattens an anyhow chain. An `AppError` anywhere in the chain is kept
/// as is; other links become `APP/UNKNOWN` causes.
impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }
            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let mut app_error = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        use serde_json::error::Category;
        let code = match error.classify() {
            Category::Data => "JSON/DATA",
            Category::Syntax => "JSON/SYNTAX",
            Category::Eof => "JSON/EOF",
            Category::Io => "JSON/IO",
        };
        let mut app_error = AppError::new(code, error.to_string());
        if error.line() > 0 {
            app_error = app_error
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        app_error
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            "HTTP/TIMEOUT"
        } else if error.is_connect() {
            "HTTP/CONNECT"
        } else if error.is_decode() {
            "HTTP/DECODE"
        } else {
            "HTTP/REQUEST"
        };
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(status) = error.status() {
            app_error = app_error.with_context("status", status.as_u16().to_string());
        }
        if let Some(url) = error.url() {
            app_error = app_error.with_context("path", url.path().to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("DB/ROW_NOT_FOUND", "Record not found"),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
                AppError::new("DB/UNAVAILABLE", "The local database is not available")
                    .with_context("detail", error.to_string())
            }
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlite"),
            SqlxError::Database(db) => {
                let code = if db.is_unique_violation() {
                    "DB/UNIQUE".to_string()
                } else if db.is_foreign_key_violation() {
                    "DB/FOREIGN_KEY".to_string()
                } else {
                    db.code()
                        .map(|code| format!("DB/SQLITE_{code}"))
                        .unwrap_or_else(|| "DB/ERROR".to_string())
                };
                AppError::new(code, db.message().to_string())
            }
            other => AppError::new("DB/ERROR", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn context_and_cause_are_kept() {
        let error = AppError::new("ITEM/NOT_FOUND", "Item not found")
            .with_context("table", "items")
            .with_context("id", "12")
            .with_cause(AppError::new("DB/ROW_NOT_FOUND", "Record not found"));

        assert!(error.is("ITEM/NOT_FOUND"));
        assert_eq!(error.to_string(), "Item not found");
        assert_eq!(error.context().get("id"), Some(&"12".to_string()));
        assert_eq!(error.cause().map(AppError::code), Some("DB/ROW_NOT_FOUND"));
        assert!(error.source().is_some());
    }

    #[test]
    fn anyhow_chain_becomes_nested_causes() {
        let err = (|| -> anyhow::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
                .context("failed to read image")
        })()
        .unwrap_err();

        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), AppError::UNKNOWN_CODE);
        assert_eq!(app_error.message(), "failed to read image");
        let cause = app_error.cause().expect("io cause present");
        assert!(cause.message().contains("disk full"));
    }

    #[test]
    fn app_error_inside_anyhow_context_survives() {
        let inner = AppError::new("STORAGE/DUPLICATE", "exists").with_context("path", "public/a.png");
        let wrapped = anyhow::Error::new(inner.clone()).context("uploading images");
        let converted = AppError::from(wrapped);
        assert_eq!(converted.message(), "uploading images");
        assert_eq!(converted.cause(), Some(&inner));
        assert_eq!(format!("{:#}", anyhow::Error::new(inner)), "exists");
    }

    #[test]
    fn with_message_keeps_code_and_context() {
        let error = AppError::new("BACKEND/400", "bad")
            .with_context("table", "items")
            .with_message("Upload failed: bad");
        assert_eq!(error.code(), "BACKEND/400");
        assert_eq!(error.message(), "Upload failed: bad");
        assert_eq!(error.context().get("table"), Some(&"items".to_string()));
    }

    #[test]
    fn serde_json_errors_capture_position() {
        let err: SerdeJsonError =
            serde_json::from_str::<serde_json::Value>("{\"name\": }").expect_err("invalid json");
        let app_error = AppError::from(err);
        assert_eq!(app_error.code(), "JSON/SYNTAX");
        assert!(app_error.context().contains_key("line"));
        assert!(app_error.context().contains_key("column"));
    }

    #[test]
    fn sqlx_row_not_found_has_its_own_code() {
        let app_error = AppError::from(SqlxError::RowNotFound);
        assert_eq!(app_error.code(), "DB/ROW_NOT_FOUND");
    }

    #[test]
    fn io_error_keeps_os_code() {
        let app_error = AppError::from(IoError::from_raw_os_error(2));
        assert_eq!(app_error.code(), "IO/NotFound");
        assert_eq!(app_error.context().get("os_code"), Some(&"2".to_string()));
    }

    #[test]
    fn serializes_without_empty_fields() {
        let error = AppError::new("VALIDATION/INVALID_FIELDS", "nope").with_context("name", "Name is required");
        let value = serde_json::to_value(&error).expect("serialize app error");
        assert_eq!(value["code"], "VALIDATION/INVALID_FIELDS");
        assert_eq!(value["context"]["name"], "Name is required");
        assert!(value.get("cause").is_none());
    }
}
