//! The seam to the hosted service.
//!
//! Everything the application persists goes through three small
//! capabilities: auth, table rows and blob storage. `RestBackend` talks to a
//! Supabase-compatible deployment over HTTP; `LocalBackend` keeps the same
//! contract on top of SQLite and a directory of blobs.

use serde_json::{Map, Value};

use crate::auth::{Session, SignUpOutcome};
use crate::AppResult;

pub mod local;
pub mod rest;

pub use local::LocalBackend;
pub use rest::RestBackend;

pub const ERR_STORAGE_DUPLICATE: &str = "STORAGE/DUPLICATE";
pub const ERR_TABLE_UNKNOWN: &str = "TABLE/UNKNOWN";

/// Row predicate understood by every backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// Array column contains the given string element.
    Contains(String, String),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn contains(column: impl Into<String>, element: impl Into<String>) -> Self {
        Filter::Contains(column.into(), element.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::Contains(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait AuthBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome>;
    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session>;
    async fn refresh(&self, refresh_token: &str) -> AppResult<Session>;
    async fn sign_out(&self, session: &Session) -> AppResult<()>;
    /// Attach (or detach) the session whose token authorizes later calls.
    fn set_session(&self, session: Option<&Session>);
}

#[allow(async_fn_in_trait)]
pub trait TableBackend {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> AppResult<Vec<Value>>;
    /// Insert one row and return it as stored (with generated columns).
    async fn insert(&self, table: &str, row: Map<String, Value>) -> AppResult<Value>;
    /// Patch every row matching `filters`; returns the updated rows.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Map<String, Value>,
    ) -> AppResult<Vec<Value>>;
    /// Delete every row matching `filters`; returns how many went away.
    async fn delete(&self, table: &str, filters: &[Filter]) -> AppResult<u64>;
}

#[allow(async_fn_in_trait)]
pub trait StorageBackend {
    /// Store a new object. An existing object at `path` is never replaced;
    /// the call fails with `STORAGE/DUPLICATE` instead.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> AppResult<()>;
    async fn remove(&self, bucket: &str, paths: &[String]) -> AppResult<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Inverse of [`StorageBackend::public_url`].
    fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        let prefix = self.public_url(bucket, "");
        url.strip_prefix(prefix.as_str())
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|rest| !rest.is_empty())
    }
}

pub trait Backend: AuthBackend + TableBackend + StorageBackend {}

impl<T> Backend for T where T: AuthBackend + TableBackend + StorageBackend {}

/// Runtime-selected backend, for callers that pick the implementation
/// from configuration.
pub enum AnyBackend {
    Rest(RestBackend),
    Local(LocalBackend),
}

impl AuthBackend for AnyBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        match self {
            AnyBackend::Rest(b) => b.sign_up(email, password).await,
            AnyBackend::Local(b) => b.sign_up(email, password).await,
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        match self {
            AnyBackend::Rest(b) => b.sign_in(email, password).await,
            AnyBackend::Local(b) => b.sign_in(email, password).await,
        }
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        match self {
            AnyBackend::Rest(b) => b.refresh(refresh_token).await,
            AnyBackend::Local(b) => b.refresh(refresh_token).await,
        }
    }

    async fn sign_out(&self, session: &Session) -> AppResult<()> {
        match self {
            AnyBackend::Rest(b) => b.sign_out(session).await,
            AnyBackend::Local(b) => b.sign_out(session).await,
        }
    }

    fn set_session(&self, session: Option<&Session>) {
        match self {
            AnyBackend::Rest(b) => b.set_session(session),
            AnyBackend::Local(b) => b.set_session(session),
        }
    }
}

impl TableBackend for AnyBackend {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> AppResult<Vec<Value>> {
        match self {
            AnyBackend::Rest(b) => b.select(table, filters, order).await,
            AnyBackend::Local(b) => b.select(table, filters, order).await,
        }
    }

    async fn insert(&self, table: &str, row: Map<String, Value>) -> AppResult<Value> {
        match self {
            AnyBackend::Rest(b) => b.insert(table, row).await,
            AnyBackend::Local(b) => b.insert(table, row).await,
        }
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Map<String, Value>,
    ) -> AppResult<Vec<Value>> {
        match self {
            AnyBackend::Rest(b) => b.update(table, filters, patch).await,
            AnyBackend::Local(b) => b.update(table, filters, patch).await,
        }
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> AppResult<u64> {
        match self {
            AnyBackend::Rest(b) => b.delete(table, filters).await,
            AnyBackend::Local(b) => b.delete(table, filters).await,
        }
    }
}

impl StorageBackend for AnyBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> AppResult<()> {
        match self {
            AnyBackend::Rest(b) => b.upload(bucket, path, bytes, content_type).await,
            AnyBackend::Local(b) => b.upload(bucket, path, bytes, content_type).await,
        }
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> AppResult<()> {
        match self {
            AnyBackend::Rest(b) => b.remove(bucket, paths).await,
            AnyBackend::Local(b) => b.remove(bucket, paths).await,
        }
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        match self {
            AnyBackend::Rest(b) => b.public_url(bucket, path),
            AnyBackend::Local(b) => b.public_url(bucket, path),
        }
    }

    fn object_path(&self, bucket: &str, url: &str) -> Option<String> {
        match self {
            AnyBackend::Rest(b) => b.object_path(bucket, url),
            AnyBackend::Local(b) => b.object_path(bucket, url),
        }
    }
}
