use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::error::RenderError;
use crate::models::{
    request::into_record, AppConfig, ClipRect, RenderConfig, RenderOptions, RenderRequest,
    TemplateContract, Viewport, VIEWPORT_KEY,
};
use crate::rendering::{Bitmap, ContentProbe, ReadinessPolicy};
use crate::services::{Session, SessionPool, TemplateCache};

/// Template used by [`RenderPipeline::render_error`]
const ERROR_TEMPLATE: &str = "error";

/// Orchestrates template → session → bitmap for a single render
pub struct RenderPipeline {
    templates: Arc<TemplateCache>,
    pool: SessionPool,
    config: RenderConfig,
    contracts: HashMap<String, TemplateContract>,
}

impl RenderPipeline {
    pub fn new(
        templates: Arc<TemplateCache>,
        pool: SessionPool,
        config: RenderConfig,
        contracts: HashMap<String, TemplateContract>,
    ) -> Self {
        Self {
            templates,
            pool,
            config,
            contracts,
        }
    }

    pub fn from_config(templates: Arc<TemplateCache>, pool: SessionPool, config: &AppConfig) -> Self {
        Self::new(
            templates,
            pool,
            config.render.clone(),
            config.templates.clone(),
        )
    }

    /// Render a template with a data record into a bitmap sized to its content.
    ///
    /// Template and data problems fail before a session is acquired. Once a
    /// session is held it is always handed back: released for reuse, or
    /// destroyed when the engine failed fatally or the deadline expired.
    pub async fn render(
        &self,
        template: &str,
        data: Value,
        options: RenderOptions,
    ) -> Result<Bitmap, RenderError> {
        let started = Instant::now();
        let contract = self.contracts.get(template);

        let width = options
            .width
            .or_else(|| contract.and_then(|c| c.width))
            .unwrap_or(self.config.default_width);
        let viewport = self.config.viewport(width)?;

        let compiled = self.templates.get_or_compile(template)?;
        let mut record = match contract {
            Some(contract) => contract.apply(template, data)?,
            None => into_record(template, data)?,
        };
        record.insert(
            VIEWPORT_KEY.to_string(),
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "density": viewport.density,
            }),
        );
        let markup = compiled.render(&Value::Object(record))?;

        let probe = contract
            .and_then(|c| c.ready_signal.clone())
            .map_or(ContentProbe::DocumentLoaded, ContentProbe::ElementPresent);

        tracing::debug!(
            template = %template,
            width = viewport.width,
            markup_len = markup.len(),
            "Template rendered"
        );

        let mut lease = self.pool.acquire().await?;
        let session_id = lease.id();
        let deadline = self.config.request_deadline();

        let outcome = tokio::time::timeout(
            deadline,
            self.drive(&mut lease, viewport, &markup, &probe),
        )
        .await;

        let result = match outcome {
            Ok(Ok(bitmap)) => {
                self.pool.release(lease).await;
                Ok(bitmap)
            }
            Ok(Err(RenderError::Engine(e))) if e.is_fatal() => {
                self.pool.destroy(lease, "engine failure during render");
                Err(RenderError::SessionCorrupted(e.to_string()))
            }
            Ok(Err(e)) => {
                self.pool.release(lease).await;
                Err(e)
            }
            Err(_) => {
                self.pool.destroy(lease, "request deadline exceeded");
                Err(RenderError::RenderTimeout {
                    after_ms: deadline.as_millis() as u64,
                })
            }
        };

        let elapsed = started.elapsed();
        match &result {
            Ok(bitmap) if elapsed > self.config.slow_threshold() => tracing::warn!(
                template = %template,
                session = session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                width = bitmap.width,
                height = bitmap.height,
                "Slow render"
            ),
            Ok(bitmap) => tracing::debug!(
                template = %template,
                session = session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                width = bitmap.width,
                height = bitmap.height,
                "Render complete"
            ),
            Err(e) => tracing::warn!(
                template = %template,
                session = session_id,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Render failed"
            ),
        }

        result
    }

    /// Steps that talk to the engine, in order
    async fn drive(
        &self,
        session: &mut Session,
        viewport: Viewport,
        markup: &str,
        probe: &ContentProbe,
    ) -> Result<Bitmap, RenderError> {
        if session.viewport() != viewport {
            tracing::trace!(
                session = session.id(),
                from = session.viewport().width,
                to = viewport.width,
                "Switching viewport"
            );
            session.set_viewport(viewport).await?;
        }

        let engine = session.engine();
        engine.load(markup, ReadinessPolicy::Structural).await?;

        if !engine.wait_until(probe, self.config.ready_timeout()).await? {
            tracing::debug!(?probe, "Readiness signal not seen in time, capturing anyway");
        }
        tokio::time::sleep(self.config.settle_delay()).await;

        let content = engine.measure_content().await?;
        let clip = ClipRect::from_content(content);
        if !clip.fits_capture(viewport.density) {
            return Err(RenderError::UnsupportedDimensions {
                width: content.width,
                height: content.height,
            });
        }
        Ok(engine.capture(clip, true).await?)
    }

    pub async fn render_request(&self, request: RenderRequest) -> Result<Bitmap, RenderError> {
        self.render(&request.template, request.data, request.options)
            .await
    }

    /// Render the error card for a message
    pub async fn render_error(&self, message: &str) -> Result<Bitmap, RenderError> {
        self.render(
            ERROR_TEMPLATE,
            json!({ "message": message }),
            RenderOptions::default(),
        )
        .await
    }

    /// Drop every compiled template; returns how many were dropped
    pub fn clear_template_cache(&self) -> usize {
        self.templates.clear()
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn contract(&self, template: &str) -> Option<&TemplateContract> {
        self.contracts.get(template)
    }
}
