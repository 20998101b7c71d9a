//! Assertion helpers for tests.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use super::app::TestResponse;

/// Assert response has expected status code
pub fn assert_status(response: &TestResponse, expected: StatusCode) {
    assert_eq!(
        response.status, expected,
        "Expected status {}, got {}. Body: {}",
        expected,
        response.status,
        response.text()
    );
}

/// Assert response is OK (200)
pub fn assert_ok(response: &TestResponse) {
    assert_status(response, StatusCode::OK);
}

/// Assert response is a valid PNG image
pub fn assert_png(response: &TestResponse) {
    assert_ok(response);
    assert!(
        response.is_png(),
        "Expected PNG image, got {} bytes starting with {:?}",
        response.body.len(),
        &response.body[..8.min(response.body.len())]
    );

    let content_type = response
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok());
    assert_eq!(
        content_type,
        Some("image/png"),
        "Expected Content-Type: image/png"
    );
}

/// Assert the PNG's encoded dimensions match the response headers
pub fn assert_png_size(response: &TestResponse, width: u32, height: u32) {
    assert_png(response);
    assert_eq!(response.header_u32("x-render-width"), Some(width));
    assert_eq!(response.header_u32("x-render-height"), Some(height));
    assert_eq!(
        snapcard::rendering::encode::dimensions(&response.body),
        Some((width, height))
    );
}

/// Assert a JSON error body with the given kind
pub fn assert_error_kind(response: &TestResponse, status: StatusCode, kind: &str) {
    assert_status(response, status);
    let json: serde_json::Value = response.json();
    assert_eq!(json["status"].as_u64(), Some(status.as_u16() as u64));
    assert_eq!(
        json["kind"].as_str(),
        Some(kind),
        "Unexpected error body: {}",
        serde_json::to_string_pretty(&json).unwrap()
    );
}
