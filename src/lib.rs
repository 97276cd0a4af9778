pub mod appresult;
pub mod config;
pub mod db;
mod error;
pub mod live;
pub mod models;
pub mod registry;
pub mod session;
pub mod spaces;
pub mod updates;
pub mod users;

use axum::{Json, Router, extract::FromRef, routing::get};
use serde::Serialize;

pub use appresult::{AppError, AppResult};
pub use error::{Error, Result};

use crate::{config::Config, db::Store, live::LiveUpdates, registry::SessionRegistry};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: Store,
    pub registry: SessionRegistry,
    pub live: LiveUpdates,
    pub config: Config,
}

/// Envelope of every JSON response body.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

pub fn data<T>(data: T) -> Json<Data<T>> {
    Json(Data { data })
}

pub(crate) fn default_count() -> i64 {
    10
}

/// The versioned API plus `/health`.
pub fn router(api_version: &str) -> Router<AppState> {
    let api = Router::new()
        .merge(users::router())
        .merge(spaces::router());

    Router::new()
        .route("/health", get(health))
        .nest(&format!("/{api_version}"), api)
}

async fn health() -> &'static str {
    "ok"
}
