//! HTTP server setup and configuration.
//!
//! This module provides the router and application state used by both
//! the production server and integration tests.

use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::assets::AssetLoader;
use crate::models::AppConfig;
use crate::rendering::{RenderEngine, SvgEngine};
use crate::services::{RenderPipeline, SessionDefaults, SessionPool, TemplateCache, TemplateSource};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RenderPipeline>,
    pub templates: Arc<TemplateCache>,
    pub pool: SessionPool,
}

impl FromRef<AppState> for Arc<RenderPipeline> {
    fn from_ref(state: &AppState) -> Self {
        state.pipeline.clone()
    }
}

impl FromRef<AppState> for SessionPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

/// Create application state from an asset loader.
///
/// Builds the SVG engine, precompiles every template and warms the pool.
pub async fn create_app_state(asset_loader: Arc<AssetLoader>) -> anyhow::Result<AppState> {
    let config = AppConfig::load_from_assets(&asset_loader);
    let engine = SvgEngine::from_config(&config.engine, asset_loader.get_fonts()).await;

    let state = create_app_state_with_engine(asset_loader, &config, Arc::new(engine))?;
    state.templates.warm();
    state.pool.warm_up(config.pool.warm_up).await;

    Ok(state)
}

/// Create application state around an existing engine (no warm-up).
pub fn create_app_state_with_engine(
    source: Arc<dyn TemplateSource>,
    config: &AppConfig,
    engine: Arc<dyn RenderEngine>,
) -> anyhow::Result<AppState> {
    let templates = Arc::new(TemplateCache::new(source));
    let defaults = SessionDefaults {
        viewport: config.render.default_viewport()?,
        filter: config.engine.filter(),
    };
    let pool = SessionPool::new(engine, config.pool.clone(), defaults);
    let pipeline = Arc::new(RenderPipeline::from_config(
        templates.clone(),
        pool.clone(),
        config,
    ));

    Ok(AppState {
        pipeline,
        templates,
        pool,
    })
}

/// Build the API router with all endpoints and middleware.
///
/// This is the core router used by both production and tests.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/render/:template", post(api::handle_render))
        .route("/api/templates", get(api::handle_list_templates))
        .route("/api/templates/clear", post(api::handle_clear_templates))
        .route("/api/pool", get(api::handle_pool_stats))
        // Health check
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
