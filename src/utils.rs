//! Utility functions shared by the session operations.

use crate::error::REASON_UNKNOWN;
use serde::Deserialize;
use serde_json::Value;

/// Error document the backend sometimes returns.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "ResponseInfo")]
    response_info: ResponseInfo,
}

#[derive(Debug, Deserialize)]
struct ResponseInfo {
    message: Option<String>,
}

/// Extracts the backend's human-readable reason from a failed response.
///
/// Falls back to [`REASON_UNKNOWN`] when the body is not the expected error
/// document.
pub async fn backend_message(response: reqwest::Response) -> String {
    let body = response.bytes().await.unwrap_or_default();
    message_from_body(&body)
}

fn message_from_body(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.response_info.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| REASON_UNKNOWN.to_string())
}

/// MIME type for an uploadable document extension.
///
/// Matching is case-insensitive; unknown extensions are sent as PDF.
pub fn document_mime(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "epub" => "application/epub+zip",
        _ => "application/pdf",
    }
}

/// MIME type for a cover image, `None` for unsupported formats.
pub fn image_mime(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

/// Last path segment of a URL, ignoring query and fragment.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let path = without_fragment.split('?').next().unwrap_or(without_fragment);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Reads an integer that the backend may send as a number or a string.
pub fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
