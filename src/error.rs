use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::rendering::EngineError;
use crate::services::TemplateError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Rendering error: {0}")]
    Render(#[from] RenderError),
}

/// Failure of a render request or of the session pool behind it
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Invalid data for template {template}: {reason}")]
    InvalidData { template: String, reason: String },

    #[error("Unsupported dimensions: {width}x{height}")]
    UnsupportedDimensions { width: u32, height: u32 },

    #[error("Unsupported pixel density: {0}")]
    UnsupportedDensity(f32),

    #[error("Session creation failed: {0}")]
    SessionCreationFailed(String),

    #[error("Session corrupted: {0}")]
    SessionCorrupted(String),

    #[error("Render timed out after {after_ms}ms")]
    RenderTimeout { after_ms: u64 },

    #[error("No session available after waiting {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("Renderer is shutting down")]
    ShuttingDown,

    #[error("Render failed: {0}")]
    Engine(#[from] EngineError),
}

impl RenderError {
    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::TemplateNotFound(_) => "template_not_found",
            RenderError::Template(_) => "template_error",
            RenderError::InvalidData { .. } => "invalid_data",
            RenderError::UnsupportedDimensions { .. } | RenderError::UnsupportedDensity(_) => {
                "unsupported_dimensions"
            }
            RenderError::SessionCreationFailed(_) => "session_creation_failed",
            RenderError::SessionCorrupted(_) => "session_corrupted",
            RenderError::RenderTimeout { .. } => "render_timeout",
            RenderError::PoolExhausted { .. } => "pool_exhausted",
            RenderError::ShuttingDown => "shutting_down",
            RenderError::Engine(_) => "render_failed",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RenderError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            RenderError::InvalidData { .. }
            | RenderError::UnsupportedDimensions { .. }
            | RenderError::UnsupportedDensity(_) => StatusCode::BAD_REQUEST,
            RenderError::RenderTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RenderError::PoolExhausted { .. } | RenderError::ShuttingDown => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RenderError::Template(_)
            | RenderError::SessionCreationFailed(_)
            | RenderError::SessionCorrupted(_)
            | RenderError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<TemplateError> for RenderError {
    fn from(e: TemplateError) -> Self {
        match e {
            TemplateError::NotFound(name) => RenderError::TemplateNotFound(name),
            other => RenderError::Template(other.describe()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Render(e) => (e.status(), e.kind()),
        };

        let message = match &self {
            ApiError::Render(e) => e.to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "status": status.as_u16(),
            "kind": kind,
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_error_template_not_found() {
        let error = RenderError::TemplateNotFound("board".to_string());
        assert_eq!(error.to_string(), "Template not found: board");
        assert_eq!(error.kind(), "template_not_found");
    }

    #[test]
    fn test_render_error_unsupported_dimensions() {
        let error = RenderError::UnsupportedDimensions {
            width: 9999,
            height: 9999,
        };
        assert_eq!(error.to_string(), "Unsupported dimensions: 9999x9999");
    }

    #[test]
    fn test_render_error_timeout() {
        let error = RenderError::RenderTimeout { after_ms: 1500 };
        assert_eq!(error.to_string(), "Render timed out after 1500ms");
        assert_eq!(error.kind(), "render_timeout");
    }

    #[test]
    fn test_render_error_from_engine_error() {
        let error: RenderError = EngineError::Markup("unexpected end".to_string()).into();
        assert_eq!(error.kind(), "render_failed");
        assert_eq!(error.to_string(), "Render failed: Markup error: unexpected end");
    }

    #[test]
    fn test_template_not_found_maps_to_render_error() {
        let error: RenderError = TemplateError::NotFound("nope".to_string()).into();
        assert!(matches!(error, RenderError::TemplateNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_api_error_from_render_error() {
        let api_error: ApiError = RenderError::ShuttingDown.into();
        assert!(matches!(api_error, ApiError::Render(RenderError::ShuttingDown)));
    }

    #[test]
    fn test_api_error_into_response_status_codes() {
        let response = ApiError::BadRequest("width".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            ApiError::Render(RenderError::TemplateNotFound("x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = ApiError::Render(RenderError::InvalidData {
            template: "board".to_string(),
            reason: "missing cells".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            ApiError::Render(RenderError::RenderTimeout { after_ms: 10 }).into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response =
            ApiError::Render(RenderError::PoolExhausted { waited_ms: 10 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiError::Render(RenderError::SessionCorrupted("gone".to_string()))
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
