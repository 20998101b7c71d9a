use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use utoipa::IntoParams;

use crate::error::ApiError;
use crate::models::RenderOptions;
use crate::rendering::Bitmap;
use crate::services::RenderPipeline;

pub const RENDER_WIDTH_HEADER: HeaderName = HeaderName::from_static("x-render-width");
pub const RENDER_HEIGHT_HEADER: HeaderName = HeaderName::from_static("x-render-height");
/// Error kind of a failed render answered with the error card
pub const RENDER_ERROR_HEADER: HeaderName = HeaderName::from_static("x-render-error");

/// Query parameters for the render endpoint
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RenderQuery {
    /// Viewport width in CSS pixels (defaults to the template's or configured width)
    #[serde(default)]
    pub width: Option<u32>,

    /// Answer a failed render with the error card instead of an error status
    #[serde(default)]
    pub fallback: bool,
}

/// Render a template to PNG
///
/// The request body is the template's data record as a JSON object. An empty
/// body renders with an empty record. The image is sized to the rendered
/// content. With `fallback=true` a failed render is answered with the error
/// card and its error kind in `X-Render-Error`.
#[utoipa::path(
    post,
    path = "/api/render/{template}",
    request_body(content = Object, description = "Data record for the template", content_type = "application/json"),
    responses(
        (status = 200, description = "PNG image (the error card when a fallback was served)", content_type = "image/png"),
        (status = 400, description = "Invalid data or dimensions"),
        (status = 404, description = "Template not found"),
        (status = 503, description = "No rendering session available"),
        (status = 504, description = "Render deadline exceeded"),
    ),
    params(
        ("template" = String, Path, description = "Template identifier"),
        RenderQuery,
    ),
    tag = "Render"
)]
pub async fn handle_render(
    State(pipeline): State<Arc<RenderPipeline>>,
    Path(template): Path<String>,
    Query(query): Query<RenderQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let data: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?
    };

    tracing::info!(template = %template, width = ?query.width, "Render request received");

    let result = pipeline
        .render(&template, data, RenderOptions { width: query.width })
        .await;

    let bitmap = match result {
        Ok(bitmap) => bitmap,
        Err(e) if query.fallback => {
            let kind = e.kind();
            match pipeline.render_error(&e.to_string()).await {
                Ok(card) => {
                    tracing::info!(template = %template, kind, "Render failed, serving error card");
                    let mut response = png_response(card);
                    response
                        .headers_mut()
                        .insert(RENDER_ERROR_HEADER, HeaderValue::from_static(kind));
                    return Ok(response);
                }
                Err(fallback_error) => {
                    tracing::warn!(error = %fallback_error, "Error card could not be rendered");
                    return Err(e.into());
                }
            }
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        template = %template,
        width = bitmap.width,
        height = bitmap.height,
        size_bytes = bitmap.png.len(),
        "Image rendered successfully"
    );

    Ok(png_response(bitmap))
}

fn png_response(bitmap: Bitmap) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (header::CONTENT_LENGTH, bitmap.png.len().to_string()),
            (RENDER_WIDTH_HEADER, bitmap.width.to_string()),
            (RENDER_HEIGHT_HEADER, bitmap.height.to_string()),
        ],
        Bytes::from(bitmap.png),
    )
        .into_response()
}
