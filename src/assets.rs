//! Asset loading with embedded fallbacks
//!
//! Templates and the default config are compiled into the binary. When an
//! external location is configured (env var set), the filesystem is consulted
//! first and the embedded copy is the fallback:
//!
//! - `TEMPLATES_DIR`: `<identifier>.svg` files override embedded templates
//! - `FONTS_DIR`: extra fonts loaded next to the system fonts
//! - `CONFIG_FILE`: replaces the embedded `config.yaml`

use rust_embed::RustEmbed;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::services::{TemplateError, TemplateSource};

/// Extension of template files
const TEMPLATE_EXT: &str = "svg";

/// Embedded SVG templates
#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.svg"]
struct EmbeddedTemplates;

/// Embedded default config
#[derive(RustEmbed)]
#[folder = "."]
#[include = "config.yaml"]
struct EmbeddedConfig;

/// Asset loader with merge behavior and optional filesystem override
#[derive(Debug, Clone, Default)]
pub struct AssetLoader {
    /// External templates directory (from TEMPLATES_DIR env var)
    templates_dir: Option<PathBuf>,
    /// External fonts directory (from FONTS_DIR env var)
    fonts_dir: Option<PathBuf>,
    /// External config file path (from CONFIG_FILE env var)
    config_file: Option<PathBuf>,
}

impl AssetLoader {
    /// Create a new asset loader
    ///
    /// Paths should be `Some` only if the corresponding env var was set.
    /// If `None`, embedded assets are used exclusively.
    pub fn new(
        templates_dir: Option<PathBuf>,
        fonts_dir: Option<PathBuf>,
        config_file: Option<PathBuf>,
    ) -> Self {
        Self {
            templates_dir,
            fonts_dir,
            config_file,
        }
    }

    /// Create a loader from `TEMPLATES_DIR`, `FONTS_DIR` and `CONFIG_FILE`
    pub fn from_env() -> Self {
        let path = |var: &str| std::env::var(var).ok().map(PathBuf::from);
        Self::new(path("TEMPLATES_DIR"), path("FONTS_DIR"), path("CONFIG_FILE"))
    }

    pub fn templates_dir(&self) -> Option<&Path> {
        self.templates_dir.as_deref()
    }

    /// Read a template by identifier
    ///
    /// If an external directory is configured, tries it first, then falls back to embedded.
    pub fn read_template(&self, identifier: &str) -> io::Result<String> {
        if !is_valid_identifier(identifier) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Invalid template identifier: {identifier}"),
            ));
        }
        let file_name = format!("{identifier}.{TEMPLATE_EXT}");

        if let Some(ref dir) = self.templates_dir {
            let full_path = dir.join(&file_name);
            if full_path.exists() {
                tracing::trace!(path = %full_path.display(), "Loading template from filesystem");
                return fs::read_to_string(&full_path);
            }
        }

        let file = EmbeddedTemplates::get(&file_name).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("Template not found: {identifier}"),
            )
        })?;
        tracing::trace!(template = %identifier, "Loading template from embedded assets");
        String::from_utf8(file.data.into_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// List all template identifiers (merged view of embedded + external)
    pub fn list_template_identifiers(&self) -> Vec<String> {
        let mut identifiers: BTreeSet<String> = EmbeddedTemplates::iter()
            .filter_map(|name| template_identifier(Path::new(name.as_ref())))
            .collect();

        if let Some(ref dir) = self.templates_dir {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    if let Some(identifier) = template_identifier(&entry.path()) {
                        identifiers.insert(identifier);
                    }
                }
            }
        }

        identifiers.into_iter().collect()
    }

    /// Get font data from the external fonts directory
    pub fn get_fonts(&self) -> Vec<(String, Cow<'static, [u8]>)> {
        let mut fonts = Vec::new();

        if let Some(ref dir) = self.fonts_dir {
            if let Ok(entries) = fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if let Some(ext) = path.extension() {
                        if matches!(ext.to_str(), Some("ttf" | "otf" | "woff" | "woff2")) {
                            if let Ok(data) = fs::read(&path) {
                                let name = entry.file_name().to_string_lossy().to_string();
                                tracing::trace!(font = %name, "Loading font from filesystem");
                                fonts.push((name, Cow::Owned(data)));
                            }
                        }
                    }
                }
            }
        }

        fonts
    }

    /// Read the config file
    ///
    /// If an external path is configured and exists, uses that.
    /// Otherwise falls back to embedded config.
    pub fn read_config(&self) -> io::Result<Cow<'static, [u8]>> {
        if let Some(ref path) = self.config_file {
            if path.exists() {
                tracing::trace!(path = %path.display(), "Loading config from filesystem");
                return Ok(Cow::Owned(fs::read(path)?));
            }
        }

        EmbeddedConfig::get("config.yaml")
            .map(|f| {
                tracing::trace!("Loading config from embedded assets");
                f.data
            })
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "Embedded config.yaml not found")
            })
    }

    /// Read config as a UTF-8 string
    pub fn read_config_string(&self) -> io::Result<String> {
        let bytes = self.read_config()?;
        String::from_utf8(bytes.into_owned())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Number of templates compiled into the binary
    pub fn embedded_template_count() -> usize {
        EmbeddedTemplates::iter().count()
    }
}

impl TemplateSource for AssetLoader {
    fn list_templates(&self) -> Vec<String> {
        self.list_template_identifiers()
    }

    fn load_source(&self, identifier: &str) -> Result<String, TemplateError> {
        self.read_template(identifier).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => TemplateError::NotFound(identifier.to_string()),
            _ => TemplateError::Io(e),
        })
    }
}

/// Identifiers are plain names: no separators, no parent references
fn is_valid_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Identifier of a template file, or `None` for non-template files
fn template_identifier(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    is_valid_identifier(stem).then(|| stem.to_string())
}
