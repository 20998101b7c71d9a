pub mod encode;
pub mod engine;
pub mod svg_engine;

pub use engine::{
    Bitmap, ContentProbe, EngineError, EngineSession, ReadinessPolicy, RenderEngine,
    ResourceKind, SubResourceFilter,
};
pub use svg_engine::{SvgEngine, SvgSession};
