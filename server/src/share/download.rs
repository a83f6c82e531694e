use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
};

use crate::error::ShareError;
use crate::state::AppState;

/// GET /download/{token}
///
/// Returns the file as an attachment while the share is eligible. Each call
/// that returns 200 uses up one download.
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<(StatusCode, HeaderMap, Vec<u8>), (StatusCode, String)> {
    let download = state.engine.retrieve(&token).await.map_err(|e| {
        match &e {
            ShareError::StorageUnavailable(_) => {
                tracing::error!("Download of lease {} failed: {}", token, e)
            }
            ShareError::CorruptState(_) => {}
            _ => tracing::debug!("Download of lease {} refused: {}", token, e),
        }
        <(StatusCode, String)>::from(e)
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&download.original_name)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, download.bytes))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::with_capacity(name.len() * 3);
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback, encoded
    )
}
