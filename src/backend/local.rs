//! Offline backend: rows in SQLite, blobs in a directory tree.
//!
//! Mirrors the hosted contract closely enough that the inventory workflow
//! behaves the same against either one: rows come back as JSON objects,
//! array columns hold JSON, an existing blob is never overwritten.

use std::io::Write;
use std::path::{Path, PathBuf};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde_json::{Map, Value};
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Column, ConnectOptions, Row, SqlitePool, TypeInfo, ValueRef};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    AuthBackend, Filter, Order, StorageBackend, TableBackend, ERR_STORAGE_DUPLICATE,
    ERR_TABLE_UNKNOWN,
};
use crate::auth::{AuthUser, Session, SignUpOutcome};
use crate::config::Config;
use crate::object_keys::validate_object_key;
use crate::security::{hash_for_logging, hash_path};
use crate::{time, AppError, AppResult};

const SESSION_TTL_SECS: i64 = 3600;

const SCHEMA: [&str; 5] = [
    r#"CREATE TABLE IF NOT EXISTS items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        category TEXT NOT NULL,
        images TEXT NOT NULL DEFAULT '[]',
        location TEXT,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS movements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        "itemId" INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
        date TEXT NOT NULL,
        origin TEXT NOT NULL,
        destination TEXT NOT NULL,
        quantity INTEGER NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS movements_item_date_idx ON movements("itemId", date)"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        access_token TEXT PRIMARY KEY,
        refresh_token TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at INTEGER NOT NULL
    )"#,
];

struct TableSpec {
    name: &'static str,
    columns: &'static [&'static str],
    /// Columns stored as JSON text and decoded on the way out.
    json_columns: &'static [&'static str],
    /// Filled with the current time when an insert leaves them out.
    stamped: Option<&'static str>,
}

static ITEMS: TableSpec = TableSpec {
    name: "items",
    columns: &[
        "id",
        "name",
        "description",
        "quantity",
        "category",
        "images",
        "location",
        "created_at",
    ],
    json_columns: &["images"],
    stamped: Some("created_at"),
};

static MOVEMENTS: TableSpec = TableSpec {
    name: "movements",
    columns: &["id", "itemId", "date", "origin", "destination", "quantity"],
    json_columns: &[],
    stamped: Some("date"),
};

impl TableSpec {
    fn column(&self, column: &str) -> AppResult<String> {
        if self.columns.contains(&column) {
            Ok(format!("\"{column}\""))
        } else {
            Err(AppError::new("TABLE/UNKNOWN_COLUMN", "Unknown column")
                .with_context("table", self.name)
                .with_context("column", column))
        }
    }

    fn decode(&self, row: SqliteRow) -> Value {
        let mut value = row_to_value(row);
        if let Value::Object(map) = &mut value {
            for column in self.json_columns {
                if let Some(Value::String(raw)) = map.get(*column) {
                    let decoded = serde_json::from_str(raw).unwrap_or(Value::Null);
                    map.insert((*column).to_string(), decoded);
                }
            }
        }
        value
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>;

fn row_to_value(row: SqliteRow) -> Value {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let val = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(raw) => match raw.type_info().name() {
                "INTEGER" => row
                    .try_get::<i64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                "REAL" => row
                    .try_get::<f64, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
                _ => row
                    .try_get::<String, _>(idx)
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            },
            Err(_) => Value::Null,
        };
        map.insert(col.name().to_string(), val);
    }
    Value::Object(map)
}

fn bind_value<'q>(q: SqliteQuery<'q>, v: &Value) -> SqliteQuery<'q> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

/// SQL predicate plus the values it binds, in order.
fn where_clause(spec: &TableSpec, filters: &[Filter]) -> AppResult<(String, Vec<Value>)> {
    let mut clauses = Vec::with_capacity(filters.len());
    let mut binds = Vec::new();
    for filter in filters {
        let column = spec.column(filter.column())?;
        match filter {
            Filter::Eq(_, Value::Null) => clauses.push(format!("{column} IS NULL")),
            Filter::Eq(_, value) => {
                clauses.push(format!("{column} = ?"));
                binds.push(value.clone());
            }
            Filter::Contains(_, element) => {
                clauses.push(format!(
                    "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = ?)"
                ));
                binds.push(Value::String(element.clone()));
            }
        }
    }
    if clauses.is_empty() {
        Ok((String::new(), binds))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
    }
}

/// Column values ready to bind: JSON columns become JSON text.
fn encode_columns(
    spec: &TableSpec,
    row: Map<String, Value>,
) -> AppResult<(Vec<String>, Vec<Value>)> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (key, value) in row {
        columns.push(spec.column(&key)?);
        let value = if spec.json_columns.contains(&key.as_str()) && !value.is_null() {
            Value::String(value.to_string())
        } else {
            value
        };
        values.push(value);
    }
    Ok((columns, values))
}

/// Argon2id in PHC string form; the salt travels inside the string.
fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AppError::new("AUTH/HASH_FAILED", err.to_string()))
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn new_token() -> String {
    Uuid::new_v4().simple().to_string()
}

fn invalid_key(path: &str, reason: &'static str) -> AppError {
    AppError::new("STORAGE/INVALID_KEY", "Invalid storage path")
        .with_context("path", path)
        .with_context("reason", reason)
}

/// Write `bytes` to a fresh file at `path`; fails with `AlreadyExists`
/// instead of replacing an existing file.
fn write_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|err| err.error)?;
    Ok(())
}

/// Items and movements always live in the `items` and `movements` SQLite
/// tables; the names callers use for them are configurable.
pub struct LocalBackend {
    pool: SqlitePool,
    storage_root: PathBuf,
    items_table: String,
    movements_table: String,
}

impl LocalBackend {
    /// Open (creating if needed) the database file and the blob directory.
    pub async fn open(db_path: &Path, storage_root: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                AppError::from(err)
                    .with_context("operation", "create_data_dir")
                    .with_context("path_hash", hash_path(parent))
            })?;
        }
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .log_statements(log::LevelFilter::Off);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "open_database"))?;
        info!(
            target: "stockroom",
            event = "db_open",
            path_hash = %hash_path(db_path)
        );
        Self::with_pool(pool, storage_root).await
    }

    /// A private in-memory database; blobs still go to `storage_root`.
    pub async fn in_memory(storage_root: &Path) -> AppResult<Self> {
        let opts = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true)
            .log_statements(log::LevelFilter::Off);
        // Every connection to :memory: is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "open_database"))?;
        Self::with_pool(pool, storage_root).await
    }

    pub async fn from_config(config: &Config) -> AppResult<Self> {
        Ok(
            Self::open(&config.local_db_path(), &config.local_storage_root())
                .await?
                .with_table_names(&config.items_table, &config.movements_table),
        )
    }

    /// Answer to `items_table` and `movements_table` instead of the
    /// default names.
    pub fn with_table_names(
        mut self,
        items_table: impl Into<String>,
        movements_table: impl Into<String>,
    ) -> Self {
        self.items_table = items_table.into();
        self.movements_table = movements_table.into();
        self
    }

    fn table_spec(&self, table: &str) -> AppResult<&'static TableSpec> {
        if table == self.items_table {
            Ok(&ITEMS)
        } else if table == self.movements_table {
            Ok(&MOVEMENTS)
        } else {
            Err(AppError::new(ERR_TABLE_UNKNOWN, "Unknown table").with_context("table", table))
        }
    }

    async fn with_pool(pool: SqlitePool, storage_root: &Path) -> AppResult<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|err| AppError::from(err).with_context("operation", "apply_schema"))?;
        }
        std::fs::create_dir_all(storage_root).map_err(|err| {
            AppError::from(err)
                .with_context("operation", "create_storage_root")
                .with_context("path_hash", hash_path(storage_root))
        })?;
        let storage_root = storage_root.canonicalize().map_err(|err| {
            AppError::from(err).with_context("operation", "resolve_storage_root")
        })?;
        Ok(Self {
            pool,
            storage_root,
            items_table: ITEMS.name.to_string(),
            movements_table: MOVEMENTS.name.to_string(),
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    fn blob_path(&self, bucket: &str, path: &str) -> AppResult<PathBuf> {
        let bucket = validate_object_key(bucket).map_err(|err| invalid_key(bucket, err.code()))?;
        if bucket.contains('/') {
            return Err(invalid_key(&bucket, "nested-bucket"));
        }
        let key = validate_object_key(path).map_err(|err| invalid_key(path, err.code()))?;
        let mut full = self.storage_root.join(bucket);
        for component in key.split('/') {
            full.push(component);
        }
        Ok(full)
    }

    async fn issue_session(&self, user: AuthUser) -> AppResult<Session> {
        let session = Session {
            access_token: new_token(),
            refresh_token: Some(new_token()),
            expires_at: time::now_secs() + SESSION_TTL_SECS,
            user,
        };
        sqlx::query(
            "INSERT INTO sessions (access_token, refresh_token, user_id, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.access_token)
        .bind(session.refresh_token.as_deref())
        .bind(&session.user.id)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "issue_session"))?;
        Ok(session)
    }
}

impl AuthBackend for LocalBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        let email = email.trim().to_lowercase();
        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "sign_up"))?;
        if existing.is_some() {
            return Err(AppError::new("AUTH/USER_EXISTS", "User already registered"));
        }

        let id = Uuid::now_v7().to_string();
        let password_hash = hash_password(password)?;
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&email)
        .bind(password_hash)
        .bind(time::now_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "sign_up"))?;
        info!(
            target: "stockroom",
            event = "local_user_created",
            email_hash = %hash_for_logging(&email)
        );

        let session = self
            .issue_session(AuthUser {
                id,
                email: Some(email),
            })
            .await?;
        Ok(SignUpOutcome::SignedIn(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        let email = email.trim().to_lowercase();
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await
                .map_err(|err| AppError::from(err).with_context("operation", "sign_in"))?;
        match row {
            Some((id, hash)) if verify_password(password, &hash) => {
                self.issue_session(AuthUser {
                    id,
                    email: Some(email),
                })
                .await
            }
            _ => Err(AppError::new(
                "AUTH/INVALID_CREDENTIALS",
                "Invalid login credentials",
            )),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT u.id, u.email FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.refresh_token = ?",
        )
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| AppError::from(err).with_context("operation", "refresh_session"))?;
        let (id, email) =
            row.ok_or_else(|| AppError::new("AUTH/INVALID_REFRESH", "Invalid Refresh Token"))?;

        // Refresh tokens are single use.
        sqlx::query("DELETE FROM sessions WHERE refresh_token = ?")
            .bind(refresh_token)
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "refresh_session"))?;
        self.issue_session(AuthUser {
            id,
            email: Some(email),
        })
        .await
    }

    async fn sign_out(&self, session: &Session) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE access_token = ?")
            .bind(&session.access_token)
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("operation", "sign_out"))?;
        Ok(())
    }

    // Rows are not scoped per user locally.
    fn set_session(&self, _session: Option<&Session>) {}
}

impl TableBackend for LocalBackend {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> AppResult<Vec<Value>> {
        let spec = self.table_spec(table)?;
        let (predicate, binds) = where_clause(spec, filters)?;
        let mut sql = format!("SELECT * FROM {}{predicate}", spec.name);
        if let Some(order) = order {
            let direction = if order.ascending { "ASC" } else { "DESC" };
            sql.push_str(&format!(" ORDER BY {} {direction}", spec.column(&order.column)?));
        }
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("table", table))?;
        Ok(rows.into_iter().map(|row| spec.decode(row)).collect())
    }

    async fn insert(&self, table: &str, mut row: Map<String, Value>) -> AppResult<Value> {
        let spec = self.table_spec(table)?;
        if let Some(column) = spec.stamped {
            row.entry(column.to_string())
                .or_insert_with(|| Value::from(time::now_rfc3339()));
        }
        let (columns, values) = encode_columns(spec, row)?;
        let placeholders = vec!["?"; columns.len()].join(",");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING *",
            spec.name,
            columns.join(",")
        );
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }
        let stored = query
            .fetch_one(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("table", table))?;
        debug!(target: "stockroom", event = "local_row_inserted", table = table);
        Ok(spec.decode(stored))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        mut patch: Map<String, Value>,
    ) -> AppResult<Vec<Value>> {
        let spec = self.table_spec(table)?;
        patch.remove("id");
        if patch.is_empty() {
            return self.select(table, filters, None).await;
        }
        let (columns, values) = encode_columns(spec, patch)?;
        let (predicate, binds) = where_clause(spec, filters)?;
        let assignments: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
        let sql = format!(
            "UPDATE {} SET {}{predicate} RETURNING *",
            spec.name,
            assignments.join(",")
        );
        let mut query = sqlx::query(&sql);
        for value in values.iter().chain(binds.iter()) {
            query = bind_value(query, value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("table", table))?;
        Ok(rows.into_iter().map(|row| spec.decode(row)).collect())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> AppResult<u64> {
        let spec = self.table_spec(table)?;
        if filters.is_empty() {
            return Err(AppError::new(
                "TABLE/UNFILTERED_DELETE",
                "Refusing to delete without a filter",
            )
            .with_context("table", table));
        }
        let (predicate, binds) = where_clause(spec, filters)?;
        let sql = format!("DELETE FROM {}{predicate}", spec.name);
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|err| AppError::from(err).with_context("table", table))?;
        Ok(result.rows_affected())
    }
}

impl StorageBackend for LocalBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        _content_type: &str,
    ) -> AppResult<()> {
        let target = self.blob_path(bucket, path)?;
        let data = bytes.to_vec();
        let written = tokio::task::spawn_blocking(move || write_new(&target, &data))
            .await
            .map_err(|err| {
                AppError::new("STORAGE/TASK_FAILED", err.to_string()).with_context("path", path)
            })?;
        match written {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Err(AppError::new(
                ERR_STORAGE_DUPLICATE,
                "The resource already exists",
            )
            .with_context("path", path)),
            Err(err) => Err(AppError::from(err)
                .with_context("operation", "storage_upload")
                .with_context("path", path)),
        }
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> AppResult<()> {
        for path in paths {
            let target = self.blob_path(bucket, path)?;
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(target: "stockroom", event = "blob_already_gone", path = path.as_str());
                }
                Err(err) => {
                    return Err(AppError::from(err)
                        .with_context("operation", "storage_remove")
                        .with_context("path", path.as_str()))
                }
            }
        }
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        let root = self.storage_root.to_string_lossy().replace('\\', "/");
        let root = root.trim_end_matches('/');
        let root = root.strip_prefix('/').unwrap_or(root);
        format!("file:///{root}/{bucket}/{}", path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn backend(dir: &Path) -> LocalBackend {
        LocalBackend::in_memory(&dir.join("storage"))
            .await
            .expect("local backend opens")
    }

    fn item_row(name: &str, images: Value) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("name".into(), json!(name));
        row.insert("description".into(), json!("desc"));
        row.insert("quantity".into(), json!(1));
        row.insert("category".into(), json!("Tools"));
        row.insert("images".into(), images);
        row
    }

    #[tokio::test]
    async fn insert_returns_generated_columns_and_json_arrays() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let stored = backend
            .insert("items", item_row("Drill", json!(["a", "b"])))
            .await
            .unwrap();
        assert_eq!(stored["id"], 1);
        assert_eq!(stored["images"], json!(["a", "b"]));
        assert!(stored["created_at"].as_str().is_some());
        assert_eq!(stored["location"], Value::Null);
    }

    #[tokio::test]
    async fn contains_filter_finds_rows_sharing_an_image() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        backend.insert("items", item_row("A", json!(["x", "y"]))).await.unwrap();
        backend.insert("items", item_row("B", json!(["y"]))).await.unwrap();
        backend.insert("items", item_row("C", json!([]))).await.unwrap();

        let rows = backend
            .select("items", &[Filter::contains("images", "y")], Some(&Order::asc("id")))
            .await
            .unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("A"), json!("B")]);
    }

    #[tokio::test]
    async fn update_and_delete_report_affected_rows() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        backend.insert("items", item_row("A", json!([]))).await.unwrap();

        let mut patch = Map::new();
        patch.insert("location".into(), json!("Shelf 2"));
        let updated = backend
            .update("items", &[Filter::eq("id", 1)], patch.clone())
            .await
            .unwrap();
        assert_eq!(updated[0]["location"], "Shelf 2");

        let none = backend
            .update("items", &[Filter::eq("id", 99)], patch)
            .await
            .unwrap();
        assert!(none.is_empty());

        assert_eq!(backend.delete("items", &[Filter::eq("id", 1)]).await.unwrap(), 1);
        assert_eq!(backend.delete("items", &[Filter::eq("id", 1)]).await.unwrap(), 0);
        assert!(backend.delete("items", &[]).await.is_err());
    }

    #[tokio::test]
    async fn unknown_tables_and_columns_are_rejected() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let err = backend.select("users", &[], None).await.unwrap_err();
        assert_eq!(err.code(), ERR_TABLE_UNKNOWN);

        let err = backend
            .select("items", &[Filter::eq("name; DROP TABLE items", 1)], None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TABLE/UNKNOWN_COLUMN");
    }

    #[tokio::test]
    async fn configured_table_names_map_onto_local_tables() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path())
            .await
            .with_table_names("stock_items", "stock_moves");

        let stored = backend
            .insert("stock_items", item_row("Drill", json!([])))
            .await
            .unwrap();
        let mut movement = Map::new();
        movement.insert("itemId".into(), stored["id"].clone());
        movement.insert("origin".into(), json!("Van"));
        movement.insert("destination".into(), json!("Shelf"));
        movement.insert("quantity".into(), json!(1));
        backend.insert("stock_moves", movement).await.unwrap();

        let rows = backend.select("stock_moves", &[], None).await.unwrap();
        assert_eq!(rows[0]["itemId"], stored["id"]);
        let err = backend.select("items", &[], None).await.unwrap_err();
        assert_eq!(err.code(), ERR_TABLE_UNKNOWN);
    }

    #[tokio::test]
    async fn second_upload_to_same_key_is_a_duplicate() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        backend
            .upload("items", "public/abc.png", b"one", "image/png")
            .await
            .unwrap();
        let err = backend
            .upload("items", "public/abc.png", b"two", "image/png")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ERR_STORAGE_DUPLICATE);

        let on_disk = std::fs::read(backend.storage_root().join("items/public/abc.png")).unwrap();
        assert_eq!(on_disk, b"one");
    }

    #[tokio::test]
    async fn blob_paths_cannot_escape_the_root() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let err = backend
            .upload("items", "../outside.png", b"x", "image/png")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORAGE/INVALID_KEY");
        assert_eq!(err.context().get("reason"), Some(&"relative-segment".to_string()));
    }

    #[tokio::test]
    async fn public_url_is_a_file_url_that_inverts() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let url = backend.public_url("items", "public/abc.png");
        assert!(url.starts_with("file:///"));
        assert!(url.ends_with("/items/public/abc.png"));
        assert_eq!(
            backend.object_path("items", &url).as_deref(),
            Some("public/abc.png")
        );
    }

    #[tokio::test]
    async fn remove_ignores_missing_blobs() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        backend
            .upload("items", "public/a.png", b"x", "image/png")
            .await
            .unwrap();
        backend
            .remove("items", &["public/a.png".into(), "public/missing.png".into()])
            .await
            .unwrap();
        assert!(!backend.storage_root().join("items/public/a.png").exists());
    }

    #[tokio::test]
    async fn sign_up_then_sign_in_and_refresh() {
        let dir = tempdir().unwrap();
        let backend = backend(dir.path()).await;
        let outcome = backend.sign_up("Someone@Example.com", "secret1").await.unwrap();
        let SignUpOutcome::SignedIn(first) = outcome else {
            panic!("local sign-up signs in");
        };
        assert_eq!(first.email(), Some("someone@example.com"));

        let err = backend.sign_up("someone@example.com", "other12").await.unwrap_err();
        assert_eq!(err.code(), "AUTH/USER_EXISTS");

        let err = backend.sign_in("someone@example.com", "wrong!!").await.unwrap_err();
        assert_eq!(err.message(), "Invalid login credentials");

        let session = backend.sign_in("someone@example.com", "secret1").await.unwrap();
        assert_eq!(session.user.id, first.user.id);

        let (stored,): (String,) =
            sqlx::query_as("SELECT password_hash FROM users WHERE email = 'someone@example.com'")
                .fetch_one(&backend.pool)
                .await
                .unwrap();
        assert!(stored.starts_with("$argon2id$"));
        assert!(!stored.contains("secret1"));

        let refresh = session.refresh_token.clone().unwrap();
        let fresh = backend.refresh(&refresh).await.unwrap();
        assert_ne!(fresh.access_token, session.access_token);
        assert!(backend.refresh(&refresh).await.is_err());
    }
}
