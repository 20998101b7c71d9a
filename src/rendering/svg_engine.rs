//! SVG rendering engine backed by resvg.
//!
//! Each session owns its usvg options (viewport size, stylesheet, image
//! resolver) and the most recently loaded render tree. Parsing and
//! rasterization run on the blocking thread pool so the async runtime keeps
//! serving other renders.

use async_trait::async_trait;
use resvg::usvg::{self, Transform};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiny_skia::Pixmap;

use super::encode;
use super::{
    Bitmap, ContentProbe, EngineError, EngineSession, ReadinessPolicy, RenderEngine,
    ResourceKind, SubResourceFilter,
};
use crate::models::{ClipRect, ContentBox, EngineConfig, Viewport};

/// Interval between probe evaluations in `wait_until`
const PROBE_INTERVAL: Duration = Duration::from_millis(10);

/// Renders SVG markup with resvg, one [`SvgSession`] per render surface.
pub struct SvgEngine {
    /// Font database shared by every session
    fontdb: Arc<fontdb::Database>,
    /// Stylesheet injected into every loaded document
    stylesheet: Option<Arc<str>>,
    /// Background painted under opaque captures
    background: (u8, u8, u8),
    /// Set once the engine is shut down; observed by all sessions
    closed: Arc<AtomicBool>,
    opened: AtomicU64,
}

impl SvgEngine {
    /// Create an engine with fonts loaded from the provided data
    pub fn with_fonts(fonts: Vec<(String, Cow<'static, [u8]>)>) -> Self {
        let mut fontdb = fontdb::Database::new();

        for (name, data) in fonts {
            fontdb.load_font_data(data.into_owned());
            tracing::debug!(font = %name, "Loaded font");
        }

        // Load system fonts as fallback
        fontdb.load_system_fonts();

        tracing::info!(font_count = fontdb.len(), "Loaded fonts for SVG text rendering");

        Self {
            fontdb: Arc::new(fontdb),
            stylesheet: None,
            background: (255, 255, 255),
            closed: Arc::new(AtomicBool::new(false)),
            opened: AtomicU64::new(0),
        }
    }

    /// Create an engine with system fonts only
    pub fn new() -> Self {
        Self::with_fonts(Vec::new())
    }

    /// Build an engine from configuration, fetching the shared stylesheet if one is set.
    ///
    /// A stylesheet that cannot be fetched is logged and skipped.
    pub async fn from_config(
        config: &EngineConfig,
        fonts: Vec<(String, Cow<'static, [u8]>)>,
    ) -> Self {
        let mut engine = Self::with_fonts(fonts).with_background(config.background_rgb());
        if let Some(url) = &config.stylesheet_url {
            match fetch_stylesheet(url).await {
                Ok(css) => {
                    tracing::info!(url = %url, bytes = css.len(), "Loaded shared stylesheet");
                    engine = engine.with_stylesheet(css);
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Failed to fetch stylesheet, rendering without it");
                }
            }
        }
        engine
    }

    pub fn with_stylesheet(mut self, css: impl Into<Arc<str>>) -> Self {
        self.stylesheet = Some(css.into());
        self
    }

    pub fn with_background(mut self, rgb: (u8, u8, u8)) -> Self {
        self.background = rgb;
        self
    }

    /// Number of sessions opened over the engine's lifetime
    pub fn sessions_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Default for SvgEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch a stylesheet over HTTP(S)
pub async fn fetch_stylesheet(url: &str) -> Result<String, EngineError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| EngineError::Launch(e.to_string()))?;
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| EngineError::Launch(format!("stylesheet fetch failed: {e}")))?;
    response
        .text()
        .await
        .map_err(|e| EngineError::Launch(format!("stylesheet read failed: {e}")))
}

#[async_trait]
impl RenderEngine for SvgEngine {
    async fn open_session(
        &self,
        viewport: Viewport,
        filter: &SubResourceFilter,
    ) -> Result<Box<dyn EngineSession>, EngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        let id = self.opened.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(
            session = id,
            width = viewport.width,
            height = viewport.height,
            density = viewport.density,
            "Opened SVG session"
        );
        Ok(Box::new(SvgSession {
            id,
            viewport,
            fontdb: self.fontdb.clone(),
            stylesheet: self.stylesheet.clone(),
            block_images: filter.blocks(ResourceKind::Image),
            background: self.background,
            tree: None,
            engine_closed: self.closed.clone(),
            closed: false,
            poisoned: None,
        }))
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(sessions_opened = self.sessions_opened(), "SVG engine shut down");
        }
    }
}

/// One SVG render surface
pub struct SvgSession {
    id: u64,
    viewport: Viewport,
    fontdb: Arc<fontdb::Database>,
    stylesheet: Option<Arc<str>>,
    block_images: bool,
    background: (u8, u8, u8),
    tree: Option<Arc<usvg::Tree>>,
    engine_closed: Arc<AtomicBool>,
    closed: bool,
    /// Set when a raster task died; the session must not be reused
    poisoned: Option<String>,
}

impl SvgSession {
    fn ensure_usable(&self) -> Result<(), EngineError> {
        if self.engine_closed.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }
        if self.closed {
            return Err(EngineError::Closed);
        }
        if let Some(reason) = &self.poisoned {
            return Err(EngineError::Crashed(reason.clone()));
        }
        Ok(())
    }

    fn loaded_tree(&self) -> Result<Arc<usvg::Tree>, EngineError> {
        self.tree.clone().ok_or(EngineError::NoContent)
    }

    /// usvg options for the current viewport and filter
    fn options(&self) -> usvg::Options<'static> {
        let mut options = usvg::Options {
            fontdb: self.fontdb.clone(),
            style_sheet: self.stylesheet.as_deref().map(str::to_owned),
            ..Default::default()
        };
        if let Some(size) =
            usvg::Size::from_wh(self.viewport.width as f32, self.viewport.height as f32)
        {
            options.default_size = size;
        }
        if self.block_images {
            let session = self.id;
            options.image_href_resolver = usvg::ImageHrefResolver {
                resolve_data: usvg::ImageHrefResolver::default_data_resolver(),
                resolve_string: Box::new(move |href: &str, _: &usvg::Options<'_>| {
                    tracing::trace!(session, href, "Blocked image sub-resource");
                    None
                }),
            };
        }
        options
    }

    fn evaluate(&self, probe: &ContentProbe) -> bool {
        match (&self.tree, probe) {
            (None, _) => false,
            (Some(_), ContentProbe::DocumentLoaded) => true,
            (Some(tree), ContentProbe::ElementPresent(id)) => tree.node_by_id(id).is_some(),
        }
    }
}

#[async_trait]
impl EngineSession for SvgSession {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<(), EngineError> {
        self.ensure_usable()?;
        tracing::trace!(session = self.id, width = viewport.width, "Viewport changed");
        self.viewport = viewport;
        Ok(())
    }

    async fn load(&mut self, markup: &str, readiness: ReadinessPolicy) -> Result<(), EngineError> {
        self.ensure_usable()?;
        // Nothing is ever fetched during a load, so both policies finish at parse time.
        tracing::trace!(session = self.id, ?readiness, bytes = markup.len(), "Loading markup");

        self.tree = None;
        let options = self.options();
        let markup = markup.to_owned();
        let parsed = tokio::task::spawn_blocking(move || usvg::Tree::from_str(&markup, &options))
            .await;

        match parsed {
            Ok(Ok(tree)) => {
                self.tree = Some(Arc::new(tree));
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Markup(e.to_string())),
            Err(e) => {
                let reason = format!("parse task failed: {e}");
                self.poisoned = Some(reason.clone());
                Err(EngineError::Crashed(reason))
            }
        }
    }

    async fn wait_until(
        &mut self,
        probe: &ContentProbe,
        timeout: Duration,
    ) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_usable()?;
            if self.evaluate(probe) {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(PROBE_INTERVAL).await;
        }
    }

    async fn measure_content(&mut self) -> Result<ContentBox, EngineError> {
        self.ensure_usable()?;
        let tree = self.loaded_tree()?;
        let bbox = tree.root().abs_stroke_bounding_box();
        let edge = |v: f32| {
            if v.is_finite() && v > 0.0 {
                v.ceil() as u32
            } else {
                0
            }
        };
        Ok(ContentBox {
            width: edge(bbox.right()),
            height: edge(bbox.bottom()),
        })
    }

    async fn capture(&mut self, clip: ClipRect, opaque: bool) -> Result<Bitmap, EngineError> {
        self.ensure_usable()?;
        let tree = self.loaded_tree()?;
        let density = self.viewport.density;
        let background = self.background;

        let job =
            tokio::task::spawn_blocking(move || rasterize(&tree, clip, density, background, opaque))
                .await;

        match job {
            Ok(result) => result,
            Err(e) => {
                let reason = format!("raster task failed: {e}");
                self.poisoned = Some(reason.clone());
                Err(EngineError::Crashed(reason))
            }
        }
    }

    async fn clear_content(&mut self) -> Result<(), EngineError> {
        self.tree = None;
        self.ensure_usable()
    }

    fn is_closed(&self) -> bool {
        self.closed || self.engine_closed.load(Ordering::Acquire)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.tree = None;
            tracing::debug!(session = self.id, "Closed SVG session");
        }
    }
}

/// Rasterize the clipped region of a tree and encode it as PNG
fn rasterize(
    tree: &usvg::Tree,
    clip: ClipRect,
    density: f32,
    background: (u8, u8, u8),
    opaque: bool,
) -> Result<Bitmap, EngineError> {
    let (width, height) = clip.pixel_size(density);
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| EngineError::Capture(format!("failed to allocate {width}x{height} pixmap")))?;

    if opaque {
        let (r, g, b) = background;
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, 255));
    }

    let transform = Transform::from_translate(-(clip.x as f32), -(clip.y as f32))
        .post_scale(density, density);
    resvg::render(tree, transform, &mut pixmap.as_mut());

    let png = if opaque {
        encode::encode_rgb(&pixmap)?
    } else {
        encode::encode_rgba(&pixmap)?
    };

    Ok(Bitmap { width, height, png })
}
