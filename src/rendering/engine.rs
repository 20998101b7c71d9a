//! Capability surface of a rendering engine.
//!
//! A [`RenderEngine`] opens [`EngineSession`]s. A session is one reusable,
//! stateful render surface (think: a browser tab): markup is loaded into it,
//! measured and captured, and its content is cleared before the next use.
//! Sessions are not re-entrant; callers must drive one operation at a time.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::models::{ClipRect, ContentBox, Viewport};

/// Categories of externally fetched content an engine may block.
///
/// Styling resources are deliberately not representable here: templates
/// depend on them, so they can never be blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Font,
    Media,
}

/// Engine-level I/O policy: which sub-resource categories are blocked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubResourceFilter {
    blocked: HashSet<ResourceKind>,
}

impl SubResourceFilter {
    /// Filter that allows everything
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Filter that blocks the given categories
    pub fn blocking(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            blocked: kinds.into_iter().collect(),
        }
    }

    pub fn blocks(&self, kind: ResourceKind) -> bool {
        self.blocked.contains(&kind)
    }
}

/// When a load counts as finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Document structure is built; sub-resources may still be pending
    Structural,
    /// Every sub-resource has settled. Engines that never fetch during a
    /// load may treat this the same as `Structural`.
    AllResources,
}

/// Condition evaluated against a session's loaded content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentProbe {
    /// Any document is loaded
    DocumentLoaded,
    /// An element with this id exists in the loaded document
    ElementPresent(String),
}

/// Captured raster image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Encoded PNG data
    pub png: Vec<u8>,
}

/// Errors raised by the engine or one of its sessions
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Session is closed")]
    Closed,

    #[error("Engine has been shut down")]
    ShutDown,

    #[error("Failed to open session: {0}")]
    Launch(String),

    #[error("Markup error: {0}")]
    Markup(String),

    #[error("No content loaded")]
    NoContent,

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Session crashed: {0}")]
    Crashed(String),
}

impl EngineError {
    /// Whether the session that raised this error can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Closed | EngineError::ShutDown | EngineError::Crashed(_)
        )
    }
}

/// A rendering engine that hands out sessions
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Open a fresh session with the given viewport and I/O policy
    async fn open_session(
        &self,
        viewport: Viewport,
        filter: &SubResourceFilter,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Release the engine resource; every session it opened becomes closed
    async fn shutdown(&self);
}

/// One reusable render surface
#[async_trait]
pub trait EngineSession: Send + Sync {
    async fn set_viewport(&mut self, viewport: Viewport) -> Result<(), EngineError>;

    /// Replace the session's content with `markup`
    async fn load(&mut self, markup: &str, readiness: ReadinessPolicy) -> Result<(), EngineError>;

    /// Poll `probe` until it holds or `timeout` passes; `Ok(false)` on expiry
    async fn wait_until(
        &mut self,
        probe: &ContentProbe,
        timeout: Duration,
    ) -> Result<bool, EngineError>;

    /// Natural extent of the loaded content
    async fn measure_content(&mut self) -> Result<ContentBox, EngineError>;

    async fn capture(&mut self, clip: ClipRect, opaque: bool) -> Result<Bitmap, EngineError>;

    /// Wipe loaded content so the next consumer starts blank
    async fn clear_content(&mut self) -> Result<(), EngineError>;

    fn is_closed(&self) -> bool;

    async fn close(&mut self);
}
