//! HTTP surface: the locale switch routes and the admin translation API.

mod error;
mod handlers;

pub use error::ApiError;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::i18n::{set_locale, LocaleNegotiator};
use crate::security::{authorize_api_key, API_KEY_HEADER};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub negotiator: Arc<LocaleNegotiator>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Self {
        let negotiator = Arc::new(LocaleNegotiator::from_config(&config));
        Self {
            config: Arc::new(config),
            db,
            negotiator,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/translations", get(handlers::list_translations))
        .route("/translations/groups", get(handlers::list_groups))
        .route("/translations/export.csv", get(handlers::export_csv))
        .route(
            "/translations/import.csv",
            post(handlers::import_csv).layer(DefaultBodyLimit::max(handlers::MAX_CSV_UPLOAD_BYTES)),
        )
        .route("/translations/generate", post(handlers::generate))
        .route("/translations/import", post(handlers::import_files))
        .route("/translations/publish", post(handlers::publish))
        .route(
            "/translations/:id",
            put(handlers::update_translation).delete(handlers::delete_translation),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    // The switch route writes the session itself, so it sits outside the negotiator
    let public = Router::new()
        .route("/locales", get(handlers::list_locales))
        .route_layer(middleware::from_fn_with_state(state.negotiator.clone(), set_locale))
        .route("/locale/:code", get(handlers::switch_locale));

    Router::new()
        .merge(public)
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !authorize_api_key(state.config.api_key.as_deref(), provided) {
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(req).await)
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: Config, db: Database) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    if config.api_key.is_none() {
        warn!("API_KEY is not set, admin routes will refuse every request");
    }
    let app = create_router(AppState::new(config, db));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")
}
