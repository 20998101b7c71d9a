use crate::assets::AssetLoader;
use crate::error::RenderError;
use crate::models::{TemplateContract, Viewport};
use crate::rendering::{ResourceKind, SubResourceFilter};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Application configuration loaded from config.yaml
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    /// Session pool sizing
    #[serde(default)]
    pub pool: PoolConfig,

    /// Render pipeline timing and defaults
    #[serde(default)]
    pub render: RenderConfig,

    /// Rendering engine setup
    #[serde(default)]
    pub engine: EngineConfig,

    /// Template contracts keyed by template identifier
    #[serde(default)]
    pub templates: HashMap<String, TemplateContract>,
}

/// Configuration for the session pool
#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    /// Number of idle sessions the pool tries to keep warm
    #[serde(default = "default_idle_target")]
    pub idle_target: usize,

    /// Upper bound on sessions handed out at the same time
    #[serde(default = "default_max_busy")]
    pub max_busy: usize,

    /// Sessions created at startup
    #[serde(default = "default_warm_up")]
    pub warm_up: usize,

    /// How long an acquirer may wait for a free session (none = forever)
    #[serde(default)]
    pub acquire_timeout_ms: Option<u64>,
}

fn default_idle_target() -> usize {
    2
}

fn default_max_busy() -> usize {
    4
}

fn default_warm_up() -> usize {
    2
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_target: default_idle_target(),
            max_busy: default_max_busy(),
            warm_up: default_warm_up(),
            acquire_timeout_ms: None,
        }
    }
}

/// Configuration for the render pipeline
#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    /// Viewport width used when neither request nor template sets one
    #[serde(default = "default_width")]
    pub default_width: u32,

    #[serde(default = "default_height")]
    pub default_height: u32,

    /// Device pixel ratio
    #[serde(default = "default_density")]
    pub density: f32,

    /// Grace period after the readiness signal for late style application
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Upper bound for the readiness wait (expiry is not an error)
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Hard deadline for everything a render does with its session
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,

    /// Renders slower than this are logged as warnings
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_density() -> f32 {
    1.0
}

fn default_settle_delay_ms() -> u64 {
    50
}

fn default_ready_timeout_ms() -> u64 {
    3000
}

fn default_request_deadline_ms() -> u64 {
    10_000
}

fn default_slow_threshold_ms() -> u64 {
    500
}

impl RenderConfig {
    /// Viewport for a render at the given layout width
    pub fn viewport(&self, width: u32) -> Result<Viewport, RenderError> {
        Viewport::new(width, self.default_height, self.density)
    }

    /// Viewport sessions are created with
    pub fn default_viewport(&self) -> Result<Viewport, RenderError> {
        self.viewport(self.default_width)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            default_width: default_width(),
            default_height: default_height(),
            density: default_density(),
            settle_delay_ms: default_settle_delay_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            request_deadline_ms: default_request_deadline_ms(),
            slow_threshold_ms: default_slow_threshold_ms(),
        }
    }
}

/// Configuration for the rendering engine
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Opaque background painted under every capture (`#rrggbb`)
    #[serde(default = "default_background")]
    pub background: String,

    /// Sub-resource categories blocked outright
    #[serde(default = "default_blocked")]
    pub block: Vec<ResourceKind>,

    /// Shared stylesheet fetched once at startup and applied to every document
    #[serde(default)]
    pub stylesheet_url: Option<String>,
}

fn default_background() -> String {
    "#ffffff".to_string()
}

fn default_blocked() -> Vec<ResourceKind> {
    vec![ResourceKind::Image, ResourceKind::Font, ResourceKind::Media]
}

impl EngineConfig {
    /// Background as RGB; malformed values fall back to white
    pub fn background_rgb(&self) -> (u8, u8, u8) {
        parse_hex_color(&self.background).unwrap_or_else(|| {
            tracing::warn!(background = %self.background, "Invalid background color, using white");
            (255, 255, 255)
        })
    }

    pub fn filter(&self) -> SubResourceFilter {
        SubResourceFilter::blocking(self.block.iter().copied())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            background: default_background(),
            block: default_blocked(),
            stylesheet_url: None,
        }
    }
}

/// Parse `#rrggbb` (leading `#` optional)
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

impl AppConfig {
    /// Load configuration from AssetLoader (embedded or external)
    pub fn load_from_assets(loader: &AssetLoader) -> Self {
        match loader.read_config_string() {
            Ok(content) => Self::from_yaml_or_default(&content),
            Err(e) => {
                tracing::warn!(%e, "Failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// Parse YAML, falling back to defaults when it does not parse
    pub fn from_yaml_or_default(content: &str) -> Self {
        match serde_yaml::from_str::<Self>(content) {
            Ok(config) => {
                tracing::info!(
                    templates = config.templates.len(),
                    idle_target = config.pool.idle_target,
                    max_busy = config.pool.max_busy,
                    "Loaded configuration"
                );
                config
            }
            Err(e) => {
                tracing::warn!(%e, "Failed to parse config, using defaults");
                Self::default()
            }
        }
    }

    /// Contract for a template, if one is declared
    pub fn contract(&self, template: &str) -> Option<&TemplateContract> {
        self.templates.get(template)
    }
}
