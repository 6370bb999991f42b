//! Inventory items with images and stock movements, stored in a hosted
//! backend or locally.

pub mod auth;
pub mod backend;
pub mod config;
mod error;
pub mod inventory;
pub mod items;
pub mod logging;
pub mod movements;
pub mod notify;
pub mod object_keys;
pub mod security;
pub mod time;
pub mod uploads;
pub mod util;
pub mod validation;

pub use error::{AppError, AppResult};

use backend::{AnyBackend, LocalBackend, RestBackend};
use config::{BackendKind, Config};

/// Build the backend selected by `config`.
pub async fn connect_backend(config: &Config) -> AppResult<AnyBackend> {
    let backend = match config.backend {
        BackendKind::Rest => AnyBackend::Rest(RestBackend::from_config(config)?),
        BackendKind::Local => AnyBackend::Local(LocalBackend::from_config(config).await?),
    };
    tracing::info!(
        target: "stockroom",
        event = "backend_connected",
        backend = ?config.backend
    );
    Ok(backend)
}
