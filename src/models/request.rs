use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RenderError;

/// Key injected into every template context describing the target viewport
pub const VIEWPORT_KEY: &str = "viewport";

/// Per-request render options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RenderOptions {
    /// Viewport width override; falls back to the template's or the configured default
    #[serde(default)]
    pub width: Option<u32>,
}

impl RenderOptions {
    pub fn with_width(width: u32) -> Self {
        Self { width: Some(width) }
    }
}

/// One render request as handed over by a caller
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub template: String,
    pub data: Value,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(template: impl Into<String>, data: Value) -> Self {
        Self {
            template: template.into(),
            data,
            options: RenderOptions::default(),
        }
    }

    pub fn width(mut self, width: u32) -> Self {
        self.options.width = Some(width);
        self
    }
}

/// Declared data schema and layout hints of a template
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateContract {
    /// Human readable description (shown in template listings)
    #[serde(default)]
    pub description: Option<String>,

    /// Keys the data record must carry
    #[serde(default)]
    pub required: Vec<String>,

    /// Keys whose value must not be empty (array, object or string)
    #[serde(default)]
    pub non_empty: Vec<String>,

    /// Values merged into the data record when the key is absent
    #[serde(default)]
    pub defaults: Map<String, Value>,

    /// Default viewport width for this template
    #[serde(default)]
    pub width: Option<u32>,

    /// Element id the template emits once it is fully laid out
    #[serde(default)]
    pub ready_signal: Option<String>,
}

impl TemplateContract {
    /// Validate a data record and fill in defaults.
    ///
    /// The record must be a JSON object; `null` is treated as an empty object.
    pub fn apply(&self, template: &str, data: Value) -> Result<Map<String, Value>, RenderError> {
        let mut record = into_record(template, data)?;

        for (key, value) in &self.defaults {
            if !record.contains_key(key) {
                record.insert(key.clone(), value.clone());
            }
        }

        let missing: Vec<&str> = self
            .required
            .iter()
            .filter(|key| !record.contains_key(key.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(RenderError::InvalidData {
                template: template.to_string(),
                reason: format!("missing required field(s): {}", missing.join(", ")),
            });
        }

        let empty: Vec<&str> = self
            .non_empty
            .iter()
            .filter(|key| record.get(key.as_str()).map_or(true, is_empty))
            .map(String::as_str)
            .collect();
        if !empty.is_empty() {
            return Err(RenderError::InvalidData {
                template: template.to_string(),
                reason: format!("field(s) must not be empty: {}", empty.join(", ")),
            });
        }

        Ok(record)
    }
}

/// Turn a raw data value into an object record
pub fn into_record(template: &str, data: Value) -> Result<Map<String, Value>, RenderError> {
    match data {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(RenderError::InvalidData {
            template: template.to_string(),
            reason: format!("data must be an object, got {}", json_type(&other)),
        }),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::String(text) => text.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
