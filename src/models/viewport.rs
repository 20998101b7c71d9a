use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::RenderError;

/// Largest accepted viewport edge, in CSS pixels.
pub const MAX_VIEWPORT_EDGE: u32 = 4096;

/// Largest accepted device pixel density.
pub const MAX_DENSITY: f32 = 4.0;

/// Largest captured bitmap edge, in device pixels.
pub const MAX_CAPTURE_EDGE: u32 = 16_384;

/// Viewport configuration of a rendering session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Viewport {
    /// Layout width in CSS pixels
    pub width: u32,
    /// Layout height in CSS pixels
    pub height: u32,
    /// Device pixel ratio applied at capture time
    pub density: f32,
}

impl Viewport {
    /// Create a viewport, rejecting degenerate or oversized dimensions
    pub fn new(width: u32, height: u32, density: f32) -> Result<Self, RenderError> {
        if width == 0 || height == 0 || width > MAX_VIEWPORT_EDGE || height > MAX_VIEWPORT_EDGE {
            return Err(RenderError::UnsupportedDimensions { width, height });
        }
        if !density.is_finite() || density <= 0.0 || density > MAX_DENSITY {
            return Err(RenderError::UnsupportedDensity(density));
        }
        Ok(Self {
            width,
            height,
            density,
        })
    }

    /// Same viewport with a different layout width
    pub fn with_width(self, width: u32) -> Result<Self, RenderError> {
        Self::new(width, self.height, self.density)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            density: 1.0,
        }
    }
}

/// Natural extent of rendered content, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub width: u32,
    pub height: u32,
}

/// Capture region, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl ClipRect {
    /// Clip anchored at the document origin and sized to the content
    pub fn from_content(content: ContentBox) -> Self {
        Self {
            x: 0,
            y: 0,
            width: content.width.max(1),
            height: content.height.max(1),
        }
    }

    /// Pixel dimensions of this clip at the given density
    pub fn pixel_size(&self, density: f32) -> (u32, u32) {
        let scale = |v: u32| ((v as f64 * density as f64).ceil() as u32).max(1);
        (scale(self.width), scale(self.height))
    }

    /// Whether the captured bitmap stays within [`MAX_CAPTURE_EDGE`]
    pub fn fits_capture(&self, density: f32) -> bool {
        let (width, height) = self.pixel_size(density);
        width <= MAX_CAPTURE_EDGE && height <= MAX_CAPTURE_EDGE
    }
}
