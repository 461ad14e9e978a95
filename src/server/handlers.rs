use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::error::ApiError;
use super::AppState;
use crate::csv_bridge::{export_file_name, export_stream, import_csv_file};
use crate::db::{Translation, TranslationFilter};
use crate::i18n::{session_cookie, ActiveLocale, LocaleDescriptor};
use crate::importer::ImportReport;
use crate::materializer::{GeneratedLocale, PublishedLocale};
use crate::pipeline;

const MAX_PER_PAGE: i64 = 200;

/// Largest accepted CSV upload
pub const MAX_CSV_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

// ==================== Locale Routes ====================

#[derive(Debug, Serialize)]
pub struct LocalesResponse {
    pub active: String,
    pub locales: Vec<LocaleDescriptor>,
}

/// Language switcher data
pub async fn list_locales(
    State(state): State<AppState>,
    Extension(active): Extension<ActiveLocale>,
) -> Json<LocalesResponse> {
    Json(LocalesResponse {
        active: active.0,
        locales: state.negotiator.registry().list().to_vec(),
    })
}

/// Store an available locale in the session and go back
pub async fn switch_locale(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let target = headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("/")
        .to_string();
    let mut response = (StatusCode::FOUND, [(header::LOCATION, target)]).into_response();

    if state.negotiator.is_available(&code).await {
        match session_cookie(&code) {
            Ok(cookie) => {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            Err(e) => warn!(locale = %code, "Cannot store locale in session: {}", e),
        }
    } else {
        debug!(locale = %code, "Ignoring switch to unavailable locale");
    }

    response
}

// ==================== Translation Routes ====================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub group: Option<String>,
    pub search: Option<String>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

fn default_page() -> i64 {
    1
}

fn default_per_page() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct TranslationPage {
    pub data: Vec<Translation>,
    pub page: i64,
    pub per_page: i64,
}

pub async fn list_translations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<TranslationPage>, ApiError> {
    let page = params.page.max(1);
    let per_page = params.per_page.clamp(1, MAX_PER_PAGE);

    let filter = TranslationFilter {
        group: params.group.filter(|g| !g.is_empty()),
        search: params.search.filter(|s| !s.is_empty()),
        limit: per_page,
        offset: (page - 1) * per_page,
    };
    let data = state.db.list(&filter).await?;

    Ok(Json(TranslationPage { data, page, per_page }))
}

pub async fn list_groups(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.db.groups().await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateValues {
    pub values: BTreeMap<String, String>,
}

/// Replace a record's values; empty strings are dropped
pub async fn update_translation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateValues>,
) -> Result<Json<Translation>, ApiError> {
    let values: BTreeMap<String, String> = body
        .values
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .collect();

    if !state.db.update_values(id, &values).await? {
        return Err(ApiError::NotFound(format!("Translation {}", id)));
    }

    let translation = state
        .db
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Translation {}", id)))?;
    info!(id, "Updated translation values");
    Ok(Json(translation))
}

pub async fn delete_translation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.db.delete(id).await? {
        return Err(ApiError::NotFound(format!("Translation {}", id)));
    }
    info!(id, "Deleted translation");
    Ok(StatusCode::NO_CONTENT)
}

// ==================== CSV Routes ====================

pub async fn export_csv(State(state): State<AppState>) -> Response {
    let locales = state.negotiator.registry().codes();
    let file_name = export_file_name(Local::now().naive_local());
    let body = Body::from_stream(export_stream(state.db.clone(), locales));

    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=UTF-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct CsvImportParams {
    #[serde(default = "default_overwrite")]
    pub overwrite: bool,
}

fn default_overwrite() -> bool {
    true
}

/// Store the uploaded body, import it, then remove it
pub async fn import_csv(
    State(state): State<AppState>,
    Query(params): Query<CsvImportParams>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("Missing CSV upload".to_string()));
    }

    let upload_dir = &state.config.upload_dir;
    tokio::fs::create_dir_all(upload_dir)
        .await
        .with_context(|| format!("Failed to create {}", upload_dir.display()))?;
    let path = upload_dir.join(format!("import-{}.csv", Utc::now().format("%Y%m%d%H%M%S%f")));
    tokio::fs::write(&path, &body)
        .await
        .with_context(|| format!("Failed to store upload at {}", path.display()))?;

    let rows = import_csv_file(&state.db, &path, params.overwrite).await?;
    Ok(Json(json!({ "rows": rows })))
}

// ==================== File Routes ====================

pub async fn generate(State(state): State<AppState>) -> Result<Json<Vec<GeneratedLocale>>, ApiError> {
    let config = state.config.clone();
    let results = tokio::task::spawn_blocking(move || pipeline::generate(&config))
        .await
        .context("Generate task failed")??;
    Ok(Json(results))
}

#[derive(Debug, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    pub force: bool,
}

pub async fn import_files(
    State(state): State<AppState>,
    Query(params): Query<ImportParams>,
) -> Result<Json<ImportReport>, ApiError> {
    Ok(Json(pipeline::import(&state.config, &state.db, params.force).await?))
}

pub async fn publish(State(state): State<AppState>) -> Result<Json<Vec<PublishedLocale>>, ApiError> {
    Ok(Json(pipeline::publish(&state.config, &state.db).await?))
}
