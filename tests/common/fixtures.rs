//! Test fixtures and constants.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use snapcard::models::{PoolConfig, RenderConfig, TemplateContract, Viewport};
use snapcard::rendering::{RenderEngine, SubResourceFilter};
use snapcard::services::{
    RenderPipeline, SessionDefaults, SessionPool, TemplateCache, TemplateError, TemplateSource,
};

/// Templates understood by the mock engine: `data-width`/`data-height`
/// attributes drive the measured content size.
pub mod templates {
    /// Echoes `text`, as wide as the viewport
    pub const ECHO: &str = r#"<svg id="render-ready" data-width="{{ viewport.width }}" data-height="40"><text>{{ text }}</text></svg>"#;

    /// Fixed-size content independent of the viewport
    pub const FIXED: &str = r#"<svg data-width="{{ w }}" data-height="{{ h }}"><rect/></svg>"#;

    /// Never emits its ready signal
    pub const SLOW_READY: &str = r#"<svg data-width="100" data-height="20"></svg>"#;
}

/// In-memory template source
#[derive(Default)]
pub struct StaticTemplates(HashMap<String, String>);

impl StaticTemplates {
    pub fn new(templates: &[(&str, &str)]) -> Self {
        Self(
            templates
                .iter()
                .map(|(id, body)| (id.to_string(), body.to_string()))
                .collect(),
        )
    }
}

impl TemplateSource for StaticTemplates {
    fn list_templates(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.0.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn load_source(&self, identifier: &str) -> Result<String, TemplateError> {
        self.0
            .get(identifier)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(identifier.to_string()))
    }
}

pub fn pool_config(idle_target: usize, max_busy: usize) -> PoolConfig {
    PoolConfig {
        idle_target,
        max_busy,
        warm_up: 0,
        acquire_timeout_ms: None,
    }
}

/// Render timings short enough for tests
pub fn fast_render_config() -> RenderConfig {
    RenderConfig {
        settle_delay_ms: 0,
        ready_timeout_ms: 100,
        request_deadline_ms: 2_000,
        ..RenderConfig::default()
    }
}

pub fn session_defaults() -> SessionDefaults {
    SessionDefaults {
        viewport: Viewport::default(),
        filter: SubResourceFilter::allow_all(),
    }
}

pub fn pool(engine: Arc<dyn RenderEngine>, config: PoolConfig) -> SessionPool {
    SessionPool::new(engine, config, session_defaults())
}

/// Contract for the echo template: requires `text`, waits for `render-ready`
pub fn echo_contract() -> TemplateContract {
    TemplateContract {
        required: vec!["text".to_string()],
        ready_signal: Some("render-ready".to_string()),
        ..Default::default()
    }
}

/// Pipeline over the given templates and a fresh pool around `engine`
pub fn pipeline(
    engine: Arc<dyn RenderEngine>,
    pool_config: PoolConfig,
    render: RenderConfig,
    templates: &[(&str, &str)],
    contracts: HashMap<String, TemplateContract>,
) -> RenderPipeline {
    let cache = Arc::new(TemplateCache::new(Arc::new(StaticTemplates::new(templates))));
    RenderPipeline::new(cache, pool(engine, pool_config), render, contracts)
}

/// Pipeline with the echo template and its contract
pub fn echo_pipeline(engine: Arc<dyn RenderEngine>, pool_config: PoolConfig) -> RenderPipeline {
    let mut contracts = HashMap::new();
    contracts.insert("echo".to_string(), echo_contract());
    pipeline(
        engine,
        pool_config,
        fast_render_config(),
        &[("echo", templates::ECHO), ("fixed", templates::FIXED), ("slow", templates::SLOW_READY)],
        contracts,
    )
}

pub fn echo_data(text: &str) -> Value {
    json!({ "text": text })
}
