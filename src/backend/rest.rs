//! HTTP backend for a Supabase-compatible deployment: GoTrue for auth,
//! PostgREST for tables and the storage API for blobs.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{AuthBackend, Filter, Order, StorageBackend, TableBackend, ERR_STORAGE_DUPLICATE};
use crate::auth::{AuthUser, Session, SignUpOutcome, TokenGrant};
use crate::config::Config;
use crate::{AppError, AppResult};

const APIKEY: HeaderName = HeaderName::from_static("apikey");
const PREFER: HeaderName = HeaderName::from_static("prefer");
const X_UPSERT: HeaderName = HeaderName::from_static("x-upsert");

pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::from(err).with_context("operation", "build_http_client"))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            anon_key: anon_key.trim().to_string(),
            access_token: RwLock::new(None),
        })
    }

    pub fn from_config(config: &Config) -> AppResult<Self> {
        config.validate()?;
        Self::new(
            config.url.as_deref().unwrap_or_default(),
            config.anon_key.as_deref().unwrap_or_default(),
            config.timeout,
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn bearer(&self) -> String {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        format!("Bearer {token}")
    }

    fn headers(&self, bearer: String) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(APIKEY, header_value(&self.anon_key)?);
        headers.insert(AUTHORIZATION, header_value(&bearer)?);
        Ok(headers)
    }

    fn request(&self, method: Method, path: &str) -> AppResult<RequestBuilder> {
        let headers = self.headers(self.bearer())?;
        Ok(self.client.request(method, self.endpoint(path)).headers(headers))
    }

    async fn send(&self, request: RequestBuilder, operation: &'static str) -> AppResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", operation))?;
        let status = response.status();
        debug!(
            target: "stockroom",
            event = "backend_response",
            operation = operation,
            status = status.as_u16()
        );
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status.as_u16(), &body).with_context("operation", operation))
    }

    async fn send_json(&self, request: RequestBuilder, operation: &'static str) -> AppResult<Value> {
        let response = self.send(request, operation).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|err| AppError::from(err).with_context("operation", operation))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| AppError::from(err).with_context("operation", operation))
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> AppResult<Session> {
        let request = self
            .request(Method::POST, "auth/v1/token")?
            .query(&[("grant_type", grant_type)])
            .json(&body);
        let value = self.send_json(request, "auth_token").await?;
        let grant: TokenGrant = serde_json::from_value(value)
            .map_err(|err| AppError::from(err).with_context("operation", "auth_token"))?;
        Ok(grant.into_session())
    }

    fn table_path(table: &str) -> String {
        format!("rest/v1/{table}")
    }
}

fn header_value(value: &str) -> AppResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|err| AppError::new("CONFIG/INVALID", format!("Invalid header value: {err}")))
}

/// PostgREST query parameter for a filter.
pub(crate) fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
        Filter::Eq(column, Value::String(s)) => (column.clone(), format!("eq.{s}")),
        Filter::Eq(column, other) => (column.clone(), format!("eq.{other}")),
        Filter::Contains(column, element) => {
            let quoted = element.replace('\\', "\\\\").replace('"', "\\\"");
            (column.clone(), format!("cs.{{\"{quoted}\"}}"))
        }
    }
}

pub(crate) fn order_param(order: &Order) -> String {
    let direction = if order.ascending { "asc" } else { "desc" };
    format!("{}.{direction}", order.column)
}

fn query_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(filter_param).collect()
}

/// Map an error response to an `AppError`. The storage API reports an
/// existing object either as HTTP 409 or as a 400 whose body carries
/// `statusCode: "409"`.
pub(crate) fn error_from_body(status: u16, body: &str) -> AppError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| parsed.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && parsed.is_null()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    let embedded_status = match parsed.get("statusCode") {
        Some(Value::String(s)) => s.parse::<u16>().ok(),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        _ => None,
    };
    let duplicate = status == 409 || (status == 400 && embedded_status == Some(409));
    let code = if duplicate {
        ERR_STORAGE_DUPLICATE.to_string()
    } else {
        format!("BACKEND/{status}")
    };
    AppError::new(code, message).with_context("status", status.to_string())
}

fn first_row(value: Value) -> Option<Value> {
    match value {
        Value::Array(rows) => rows.into_iter().next(),
        Value::Null => None,
        other => Some(other),
    }
}

fn rows(value: Value) -> Vec<Value> {
    match value {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

impl AuthBackend for RestBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AppResult<SignUpOutcome> {
        let request = self
            .request(Method::POST, "auth/v1/signup")?
            .json(&json!({ "email": email, "password": password }));
        let value = self.send_json(request, "auth_sign_up").await?;

        if value.get("access_token").is_some() {
            let grant: TokenGrant = serde_json::from_value(value)
                .map_err(|err| AppError::from(err).with_context("operation", "auth_sign_up"))?;
            return Ok(SignUpOutcome::SignedIn(grant.into_session()));
        }
        // Without auto-confirm the endpoint answers with the bare user.
        let user_value = value.get("user").cloned().unwrap_or(value);
        let user: AuthUser = serde_json::from_value(user_value)
            .map_err(|err| AppError::from(err).with_context("operation", "auth_sign_up"))?;
        Ok(SignUpOutcome::ConfirmationRequired(user))
    }

    async fn sign_in(&self, email: &str, password: &str) -> AppResult<Session> {
        self.token_request("password", json!({ "email": email, "password": password }))
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<Session> {
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    async fn sign_out(&self, session: &Session) -> AppResult<()> {
        let headers = self.headers(format!("Bearer {}", session.access_token))?;
        let request = self
            .client
            .post(self.endpoint("auth/v1/logout"))
            .headers(headers);
        self.send(request, "auth_sign_out").await?;
        Ok(())
    }

    fn set_session(&self, session: Option<&Session>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = session.map(|s| s.access_token.clone());
        }
    }
}

impl TableBackend for RestBackend {
    async fn select(
        &self,
        table: &str,
        filters: &[Filter],
        order: Option<&Order>,
    ) -> AppResult<Vec<Value>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query_params(filters));
        if let Some(order) = order {
            params.push(("order".to_string(), order_param(order)));
        }
        let request = self
            .request(Method::GET, &Self::table_path(table))?
            .query(&params);
        let value = self
            .send_json(request, "table_select")
            .await
            .map_err(|err| err.with_context("table", table))?;
        Ok(rows(value))
    }

    async fn insert(&self, table: &str, row: Map<String, Value>) -> AppResult<Value> {
        let request = self
            .request(Method::POST, &Self::table_path(table))?
            .header(PREFER, "return=representation")
            .json(&Value::Array(vec![Value::Object(row)]));
        let value = self
            .send_json(request, "table_insert")
            .await
            .map_err(|err| err.with_context("table", table))?;
        first_row(value).ok_or_else(|| {
            AppError::new("BACKEND/EMPTY_RESPONSE", "Insert returned no row")
                .with_context("table", table)
        })
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Map<String, Value>,
    ) -> AppResult<Vec<Value>> {
        let request = self
            .request(Method::PATCH, &Self::table_path(table))?
            .query(&query_params(filters))
            .header(PREFER, "return=representation")
            .json(&Value::Object(patch));
        let value = self
            .send_json(request, "table_update")
            .await
            .map_err(|err| err.with_context("table", table))?;
        Ok(rows(value))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> AppResult<u64> {
        let request = self
            .request(Method::DELETE, &Self::table_path(table))?
            .query(&query_params(filters))
            .header(PREFER, "return=representation");
        let value = self
            .send_json(request, "table_delete")
            .await
            .map_err(|err| err.with_context("table", table))?;
        Ok(rows(value).len() as u64)
    }
}

impl StorageBackend for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> AppResult<()> {
        let request = self
            .request(Method::POST, &format!("storage/v1/object/{bucket}/{path}"))?
            .header(CONTENT_TYPE, header_value(content_type)?)
            .header(X_UPSERT, "false")
            .body(bytes.to_vec());
        self.send(request, "storage_upload")
            .await
            .map_err(|err| err.with_context("path", path))?;
        Ok(())
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> AppResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let request = self
            .request(Method::DELETE, &format!("storage/v1/object/{bucket}"))?
            .json(&json!({ "prefixes": paths }));
        self.send(request, "storage_remove")
            .await
            .map_err(|err| err.with_context("bucket", bucket))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            self.base_url,
            path.trim_start_matches('/')
        )
    }
}
