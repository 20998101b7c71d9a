//! Compiled template cache.
//!
//! Maps a template identifier to a compiled Tera template. Unseen identifiers
//! are compiled on demand from a [`TemplateSource`]; `clear()` drops every
//! entry so subsequent renders recompile from source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tera::{Context, Tera};

/// Error type for template rendering
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),

    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Failed to read template: {0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    /// Message including the chain of underlying causes
    pub fn describe(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Where template sources come from
pub trait TemplateSource: Send + Sync {
    /// Identifiers of every known template
    fn list_templates(&self) -> Vec<String>;

    /// Raw markup source for an identifier
    fn load_source(&self, identifier: &str) -> Result<String, TemplateError>;
}

/// A template compiled and ready to be invoked against a data record
pub struct CompiledTemplate {
    identifier: String,
    source: String,
    tera: Tera,
}

impl CompiledTemplate {
    /// Compile raw markup source
    pub fn compile(identifier: &str, source: String) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        // Templates produce SVG, so interpolated data is XML-escaped.
        tera.autoescape_on(vec![".svg"]);
        register_filters(&mut tera);
        tera.add_raw_template(&Self::tera_name(identifier), &source)?;

        Ok(Self {
            identifier: identifier.to_string(),
            source,
            tera,
        })
    }

    fn tera_name(identifier: &str) -> String {
        format!("{identifier}.svg")
    }

    /// Produce markup for a data record
    pub fn render(&self, data: &serde_json::Value) -> Result<String, TemplateError> {
        let context = Context::from_serialize(data)?;
        Ok(self
            .tera
            .render(&Self::tera_name(&self.identifier), &context)?)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Raw source the template was compiled from
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Register custom Tera filters
fn register_filters(tera: &mut Tera) {
    // truncate filter with custom length
    tera.register_filter(
        "truncate",
        |value: &tera::Value, args: &HashMap<String, tera::Value>| {
            let s = tera::try_get_value!("truncate", "value", String, value);
            let len = args.get("length").and_then(|v| v.as_u64()).unwrap_or(50) as usize;

            if s.chars().count() <= len {
                Ok(tera::Value::String(s))
            } else {
                let truncated = s.chars().take(len.saturating_sub(3)).collect::<String>() + "...";
                Ok(tera::Value::String(truncated))
            }
        },
    );

    // format_time filter
    tera.register_filter(
        "format_time",
        |value: &tera::Value, args: &HashMap<String, tera::Value>| {
            let ts = tera::try_get_value!("format_time", "value", i64, value);
            let fmt = args
                .get("format")
                .and_then(|v| v.as_str())
                .unwrap_or("%H:%M");

            use chrono::{TimeZone, Utc};
            if let Some(dt) = Utc.timestamp_opt(ts, 0).single() {
                Ok(tera::Value::String(dt.format(fmt).to_string()))
            } else {
                Ok(tera::Value::String("--:--".to_string()))
            }
        },
    );
}

/// Cache of compiled templates keyed by identifier
pub struct TemplateCache {
    source: Arc<dyn TemplateSource>,
    entries: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
    caching: AtomicBool,
}

impl TemplateCache {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            entries: RwLock::new(HashMap::new()),
            caching: AtomicBool::new(true),
        }
    }

    /// Enable or disable caching; when disabled every lookup compiles fresh
    pub fn set_caching(&self, enabled: bool) {
        self.caching.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn is_caching(&self) -> bool {
        self.caching.load(Ordering::Relaxed)
    }

    /// Cached entry for an identifier, compiling (and caching) it on first use
    pub fn get_or_compile(&self, identifier: &str) -> Result<Arc<CompiledTemplate>, TemplateError> {
        if let Some(entry) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identifier)
        {
            return Ok(entry.clone());
        }

        let source = self.source.load_source(identifier)?;
        let compiled = Arc::new(CompiledTemplate::compile(identifier, source)?);
        tracing::debug!(template = %identifier, "Compiled template");

        if self.is_caching() {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            // A concurrent compile may have won the race; both are equivalent.
            let entry = entries
                .entry(identifier.to_string())
                .or_insert_with(|| compiled.clone());
            return Ok(entry.clone());
        }

        Ok(compiled)
    }

    /// Render a template with the given data
    pub fn render(&self, identifier: &str, data: &serde_json::Value) -> Result<String, TemplateError> {
        self.get_or_compile(identifier)?.render(data)
    }

    /// Drop all cached entries; returns how many were dropped
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let dropped = entries.len();
        entries.clear();
        tracing::info!(dropped, "Template cache cleared");
        dropped
    }

    /// Compile every known template up front; failures are logged and skipped
    pub fn warm(&self) -> usize {
        let mut compiled = 0;
        for identifier in self.source.list_templates() {
            match self.get_or_compile(&identifier) {
                Ok(_) => compiled += 1,
                Err(e) => {
                    tracing::warn!(template = %identifier, error = %e.describe(), "Failed to precompile template")
                }
            }
        }
        tracing::info!(templates = compiled, "Template cache warmed");
        compiled
    }

    /// Identifiers the source knows about
    pub fn identifiers(&self) -> Vec<String> {
        self.source.list_templates()
    }

    /// Whether an identifier currently has a compiled entry
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(identifier)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
