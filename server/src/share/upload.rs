use axum::{
    extract::{Multipart, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;

use crate::share::clean_display_name;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub token: String,
    pub filename: String,
    pub download_link: String,
    pub access_limit: i64,
    pub expires_at: String,
}

/// POST /upload
///
/// Multipart form fields:
/// - `file` (required): the file to share
/// - `access_limit` (optional): number of permitted downloads
/// - `expiry_minutes` (optional): minutes until the link expires
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), (StatusCode, String)> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut access_limit = state.default_access_limit;
    let mut expiry_minutes = state.default_expiry_minutes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (e.status(), e.body_text()))?
    {
        match field.name() {
            Some("file") => {
                let name = clean_display_name(field.file_name().unwrap_or(""));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| (e.status(), e.body_text()))?;
                file = Some((name, data.to_vec()));
            }
            Some("access_limit") => {
                let text = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
                if let Some(v) = parse_int_field("access_limit", &text)? {
                    access_limit = v;
                }
            }
            Some("expiry_minutes") => {
                let text = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
                if let Some(v) = parse_int_field("expiry_minutes", &text)? {
                    expiry_minutes = v;
                }
            }
            _ => {}
        }
    }

    let (filename, data) =
        file.ok_or((StatusCode::BAD_REQUEST, "No file uploaded".to_string()))?;

    if data.len() > state.max_upload_bytes {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "File size {} bytes exceeds maximum upload size of {} bytes",
                data.len(),
                state.max_upload_bytes
            ),
        ));
    }

    let lease = state
        .engine
        .create(&data, &filename, access_limit, expiry_minutes)
        .await
        .map_err(|e| {
            if e.status_code().is_server_error() {
                tracing::error!("Upload of {} failed: {}", filename, e);
            }
            <(StatusCode, String)>::from(e)
        })?;

    let base = link_base(state.public_url.as_deref(), &headers);
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "File uploaded".to_string(),
            download_link: format!("{}/download/{}", base, lease.token),
            token: lease.token,
            filename: lease.original_name,
            access_limit: lease.access_limit,
            expires_at: lease.expires_at.to_rfc3339(),
        }),
    ))
}

/// Empty values fall back to the configured default.
fn parse_int_field(name: &str, text: &str) -> Result<Option<i64>, (StatusCode, String)> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i64>()
        .map(Some)
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("{} must be an integer", name)))
}

/// Base URL for links: configured `public_url`, else scheme + Host of the request.
fn link_base(public_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(url) = public_url {
        return url.to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|p| *p == "https" || *p == "http")
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}
