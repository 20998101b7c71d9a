//! Snapcard - templated SVG cards rendered to PNG
//!
//! Renders data records through SVG templates using a bounded pool of
//! reusable rendering sessions. This library exposes modules for
//! integration testing.

pub mod api;
pub mod assets;
pub mod error;
pub mod models;
pub mod rendering;
pub mod server;
pub mod services;
