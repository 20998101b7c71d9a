pub mod config;
pub mod request;
pub mod viewport;

pub use config::{AppConfig, EngineConfig, PoolConfig, RenderConfig};
pub use request::{RenderOptions, RenderRequest, TemplateContract, VIEWPORT_KEY};
pub use viewport::{ClipRect, ContentBox, Viewport};
