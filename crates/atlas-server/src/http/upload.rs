//! Raw upload persistence under the configured upload directory.

use std::path::Path;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path as UrlPath, Query, State};
use axum::http::HeaderMap;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub url: String,
    pub name: String,
    pub content_type: String,
}

/// `POST /api/upload?filename=<name>`: store the body as `<upload_dir>/<name>`.
pub async fn store(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<UploadReceipt>, ApiError> {
    let name = file_name(&query.filename)
        .ok_or_else(|| ApiError::bad_request("filename must name a file"))?;
    if body.is_empty() {
        return Err(ApiError::bad_request("upload body is empty"));
    }

    tokio::fs::create_dir_all(state.upload_dir.as_path()).await?;
    tokio::fs::write(state.upload_dir.join(&name), &body).await?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && *value != "application/octet-stream")
        .map(str::to_string)
        .unwrap_or_else(|| content_type_for(&name).to_string());
    tracing::info!(%name, bytes = body.len(), %content_type, "stored upload");

    Ok(Json(UploadReceipt {
        url: format!("{}/api/uploads/{name}", state.public_url),
        name,
        content_type,
    }))
}

/// `GET /api/uploads/{name}`: return a stored upload.
pub async fn fetch(
    State(state): State<AppState>,
    UrlPath(name): UrlPath<String>,
) -> Result<impl IntoResponse, ApiError> {
    let name = file_name(&name).ok_or_else(|| ApiError::bad_request("invalid file name"))?;
    let bytes = match tokio::fs::read(state.upload_dir.join(&name)).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("no upload named '{name}'")));
        }
        Err(err) => return Err(err.into()),
    };
    Ok(([(CONTENT_TYPE, content_type_for(&name))], bytes))
}

/// Final path component of a client-supplied name.
fn file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw.trim()).file_name()?.to_str()?;
    (!name.is_empty()).then(|| name.to_string())
}

fn content_type_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}
