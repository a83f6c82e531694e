//! HTTP endpoints for uploading and downloading shared files.
//!
//! POST /upload: multipart upload, returns a one-time download link
//! GET /download/{token}: download while the share is still eligible
//!
//! These handlers only translate HTTP to engine calls and back; every rule
//! about limits, expiry and deletion lives in `lifecycle::engine`.

pub mod download;
pub mod upload;

/// Longest display name kept from an upload.
const MAX_NAME_CHARS: usize = 255;

/// Reduce a client-supplied filename to a display name.
///
/// Drops any directory part and control characters. The result is only ever
/// shown to downloaders; storage is addressed by blob ref.
pub fn clean_display_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "download".to_string()
    } else {
        cleaned.to_string()
    }
}
