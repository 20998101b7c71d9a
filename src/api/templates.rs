use axum::{extract::State, response::Json};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::services::RenderPipeline;

/// One entry of the template listing
#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateInfo {
    /// Template identifier
    pub name: String,
    pub description: Option<String>,
    /// Data keys the template requires
    pub required: Vec<String>,
    /// Default viewport width for this template
    pub width: Option<u32>,
    /// Whether the template is currently compiled in the cache
    pub cached: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateListResponse {
    pub templates: Vec<TemplateInfo>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CacheClearResponse {
    /// Number of compiled templates dropped
    pub dropped: usize,
}

/// List known templates
#[utoipa::path(
    get,
    path = "/api/templates",
    responses(
        (status = 200, description = "Known templates", body = TemplateListResponse),
    ),
    tag = "Templates"
)]
pub async fn handle_list_templates(
    State(pipeline): State<Arc<RenderPipeline>>,
) -> Json<TemplateListResponse> {
    let cache = pipeline.templates();
    let templates = cache
        .identifiers()
        .into_iter()
        .map(|name| {
            let contract = pipeline.contract(&name);
            TemplateInfo {
                description: contract.and_then(|c| c.description.clone()),
                required: contract.map(|c| c.required.clone()).unwrap_or_default(),
                width: contract.and_then(|c| c.width),
                cached: cache.contains(&name),
                name,
            }
        })
        .collect();

    Json(TemplateListResponse { templates })
}

/// Drop all compiled templates
///
/// The next render of each template recompiles it from source.
#[utoipa::path(
    post,
    path = "/api/templates/clear",
    responses(
        (status = 200, description = "Cache cleared", body = CacheClearResponse),
    ),
    tag = "Templates"
)]
pub async fn handle_clear_templates(
    State(pipeline): State<Arc<RenderPipeline>>,
) -> Json<CacheClearResponse> {
    let dropped = pipeline.clear_template_cache();
    Json(CacheClearResponse { dropped })
}
