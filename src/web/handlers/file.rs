//! Attachment download handler.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::Response,
};
use chrono::NaiveDateTime;

use crate::db::HistoryRepository;
use crate::web::error::ApiError;
use crate::RelayError;

use super::AppState;

/// Format of SQLite `datetime('now')` values.
const SQLITE_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Generate a safe Content-Disposition header value.
///
/// Control characters are removed, quotes and backslashes replaced in the
/// plain parameter, and non-ASCII names also get an RFC 5987 `filename*`.
fn content_disposition_header(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '"' | '\\' => '_',
            _ => c,
        })
        .collect();

    if filename.is_ascii() && sanitized == filename {
        return format!("attachment; filename=\"{}\"", filename);
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized,
        urlencoding::encode(filename)
    )
}

/// Convert a stored timestamp into an HTTP date.
fn http_date(created_at: &str) -> Option<String> {
    NaiveDateTime::parse_from_str(created_at, SQLITE_DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// GET /files/:id/:filename - Download a stored attachment.
///
/// Responds 404 unless the row exists, its bytes were stored, the filename
/// matches and the bytes are still on disk.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((file_id, filename)): Path<(i64, String)>,
) -> Result<Response<Body>, ApiError> {
    let coordinator = &state.coordinator;

    let file = {
        let mut conn = coordinator
            .database()
            .pool()
            .acquire()
            .await
            .map_err(RelayError::from)?;
        HistoryRepository::new(&mut conn).get_file(file_id).await?
    }
    .ok_or_else(|| ApiError::not_found("File not found"))?;

    if file.filename != filename {
        return Err(ApiError::not_found("File not found"));
    }
    let save_name = file
        .save_name
        .as_deref()
        .ok_or_else(|| ApiError::not_found("File not available"))?;

    let content = coordinator.codec().fetch(save_name).await.map_err(|e| {
        if !matches!(e, RelayError::NotFound(_)) {
            tracing::error!("Failed to load file {}: {}", save_name, e);
        }
        ApiError::from(e)
    })?;

    let content_type = mime_guess::from_path(&file.filename)
        .first_or_octet_stream()
        .to_string();

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_header(&file.filename),
        )
        .header(header::CONTENT_LENGTH, content.len());
    if let Some(date) = http_date(&file.created_at) {
        builder = builder.header(header::LAST_MODIFIED, date);
    }

    builder.body(Body::from(content)).map_err(|e| {
        tracing::error!("Failed to build response: {}", e);
        ApiError::internal("Failed to build response")
    })
}
