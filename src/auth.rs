//! Sign-up, sign-in and the persisted session.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::backend::AuthBackend;
use crate::security::hash_for_logging;
use crate::validation::ValidationErrors;
use crate::{time, util, AppError, AppResult};

pub const MIN_PASSWORD_LEN: usize = 6;
/// Sessions this close to expiry are refreshed before use.
const EXPIRY_MARGIN_SECS: i64 = 30;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.expires_at - EXPIRY_MARGIN_SECS <= now_secs
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(time::now_secs())
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }
}

/// Token payload as returned by the auth endpoints. `expires_at` is not
/// always present, so it is derived from `expires_in` or the JWT itself.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl TokenGrant {
    pub fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| time::now_secs() + secs))
            .or_else(|| jwt_expiry(&self.access_token))
            .unwrap_or_else(|| time::now_secs() + 3600);
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    SignedIn(Session),
    /// The account exists but must be confirmed before signing in.
    ConfirmationRequired(AuthUser),
}

/// Read the `exp` claim of a JWT without verifying it.
pub fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp").and_then(serde_json::Value::as_i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SignUp,
    SignIn,
}

impl AuthMode {
    fn failure_prefix(self) -> &'static str {
        match self {
            AuthMode::SignUp => "Sign-up failed",
            AuthMode::SignIn => "Sign-in failed",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &hash_for_logging(&self.email))
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        errors.check(
            EMAIL_RE.is_match(self.email.trim()),
            "email",
            "Invalid email address.",
        );
        errors.check(
            self.password.chars().count() >= MIN_PASSWORD_LEN,
            "password",
            "Password must be at least 6 characters.",
        );
        errors.into_result()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("Sign in to continue.")]
    Missing,
    #[error("Your session has expired. Sign in again.")]
    Expired,
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let code = match err {
            SessionError::Missing => "AUTH/REQUIRED",
            SessionError::Expired => "AUTH/SESSION_EXPIRED",
        };
        AppError::new(code, err.to_string())
    }
}

trait SessionSlot: Send + Sync {
    fn load(&self) -> AppResult<Option<Session>>;
    fn save(&self, session: &Session) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

struct FileSlot {
    path: PathBuf,
}

impl SessionSlot for FileSlot {
    fn load(&self) -> AppResult<Option<Session>> {
        match std::fs::read(&self.path) {
            Ok(raw) => match serde_json::from_slice::<Session>(&raw) {
                Ok(session) => Ok(Some(session)),
                Err(err) => {
                    warn!(
                        target: "stockroom",
                        event = "session_file_unreadable",
                        error = %err
                    );
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AppError::from(err).with_context("operation", "load_session")),
        }
    }

    fn save(&self, session: &Session) -> AppResult<()> {
        let payload = serde_json::to_vec_pretty(session)
            .map_err(|err| AppError::from(err).with_context("operation", "serialize_session"))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::from(err).with_context("operation", "save_session"))?;
        }
        util::write_atomic(&self.path, &payload)
            .map_err(|err| err.with_context("operation", "save_session"))
    }

    fn clear(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::from(err).with_context("operation", "clear_session")),
        }
    }
}

#[derive(Default)]
struct MemorySlot {
    data: Mutex<Option<Session>>,
}

impl SessionSlot for MemorySlot {
    fn load(&self) -> AppResult<Option<Session>> {
        Ok(self.data.lock().map(|g| g.clone()).unwrap_or_default())
    }

    fn save(&self, session: &Session) -> AppResult<()> {
        if let Ok(mut guard) = self.data.lock() {
            *guard = Some(session.clone());
        }
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        if let Ok(mut guard) = self.data.lock() {
            *guard = None;
        }
        Ok(())
    }
}

/// Where the current session lives between runs.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<dyn SessionSlot>,
}

impl SessionStore {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(FileSlot { path: path.into() }),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(MemorySlot::default()),
        }
    }

    pub fn snapshot(&self) -> AppResult<Option<Session>> {
        self.inner.load()
    }

    pub fn save(&self, session: &Session) -> AppResult<()> {
        self.inner.save(session)
    }

    pub fn clear(&self) -> AppResult<()> {
        self.inner.clear()
    }
}

/// Sign up or sign in, then remember the session.
pub async fn authenticate<B: AuthBackend>(
    backend: &B,
    store: &SessionStore,
    mode: AuthMode,
    credentials: &Credentials,
) -> AppResult<SignUpOutcome> {
    credentials.validate().map_err(AppError::from)?;
    let email = credentials.email.trim();
    let email_hash = hash_for_logging(email);

    let result = match mode {
        AuthMode::SignUp => backend.sign_up(email, &credentials.password).await,
        AuthMode::SignIn => backend
            .sign_in(email, &credentials.password)
            .await
            .map(SignUpOutcome::SignedIn),
    };

    let outcome = result.map_err(|err| {
        warn!(
            target: "stockroom",
            event = "auth_failed",
            mode = ?mode,
            email_hash = email_hash.as_str(),
            code = err.code()
        );
        let message = format!("{}: {}", mode.failure_prefix(), err.message());
        err.with_message(message)
    })?;

    if let SignUpOutcome::SignedIn(session) = &outcome {
        store.save(session)?;
        backend.set_session(Some(session));
    }
    info!(
        target: "stockroom",
        event = "auth_succeeded",
        mode = ?mode,
        email_hash = email_hash.as_str(),
        confirmation_required = matches!(outcome, SignUpOutcome::ConfirmationRequired(_))
    );
    Ok(outcome)
}

/// Load the stored session, refreshing it when it has expired.
pub async fn require_session<B: AuthBackend>(
    backend: &B,
    store: &SessionStore,
) -> AppResult<Session> {
    let session = store.snapshot()?.ok_or(SessionError::Missing)?;
    if !session.is_expired() {
        backend.set_session(Some(&session));
        return Ok(session);
    }

    let Some(refresh_token) = session.refresh_token.as_deref().filter(|t| !t.is_empty()) else {
        info!(target: "stockroom", event = "session_expired_without_refresh");
        store.clear()?;
        return Err(SessionError::Expired.into());
    };
    match backend.refresh(refresh_token).await {
        Ok(fresh) => {
            store.save(&fresh)?;
            backend.set_session(Some(&fresh));
            info!(target: "stockroom", event = "session_refreshed");
            Ok(fresh)
        }
        Err(err) => {
            warn!(
                target: "stockroom",
                event = "session_refresh_failed",
                code = err.code()
            );
            store.clear()?;
            Err(SessionError::Expired.into())
        }
    }
}

pub async fn sign_out<B: AuthBackend>(backend: &B, store: &SessionStore) -> AppResult<()> {
    if let Some(session) = store.snapshot()? {
        backend.set_session(Some(&session));
        if let Err(err) = backend.sign_out(&session).await {
            // The local session is dropped regardless.
            warn!(target: "stockroom", event = "sign_out_remote_failed", code = err.code());
        }
    }
    backend.set_session(None);
    store.clear()?;
    info!(target: "stockroom", event = "signed_out");
    Ok(())
}
