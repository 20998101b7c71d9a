pub mod file_watcher;
pub mod render_pipeline;
pub mod session_pool;
pub mod template_cache;

pub use file_watcher::{FileChangeEvent, FileWatcher};
pub use render_pipeline::RenderPipeline;
pub use session_pool::{PoolStats, Session, SessionDefaults, SessionId, SessionLease, SessionPool};
pub use template_cache::{CompiledTemplate, TemplateCache, TemplateError, TemplateSource};
