pub mod pool;
pub mod render;
pub mod templates;

pub use pool::{handle_pool_stats, __path_handle_pool_stats};
pub use render::{handle_render, RenderQuery, __path_handle_render};
pub use templates::{
    handle_clear_templates, handle_list_templates, CacheClearResponse, TemplateInfo,
    TemplateListResponse, __path_handle_clear_templates, __path_handle_list_templates,
};
