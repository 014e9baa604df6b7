//! DSL parser: converts raw YAML/JSON/TOML text into [`WorkflowSchema`].

use std::path::Path;

use super::schema::{WorkflowSchema, SUPPORTED_DSL_VERSIONS};
use crate::error::WorkflowError;

/// Supported DSL input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DslFormat {
    /// YAML format (`.yaml` / `.yml`).
    Yaml,
    /// JSON format (`.json`).
    Json,
    /// TOML format (`.toml`).
    Toml,
}

impl DslFormat {
    pub fn from_path(path: &Path) -> Option<DslFormat> {
        match path.extension()?.to_str()? {
            "yaml" | "yml" => Some(DslFormat::Yaml),
            "json" => Some(DslFormat::Json),
            "toml" => Some(DslFormat::Toml),
            _ => None,
        }
    }
}

/// Parse DSL content into WorkflowSchema
pub fn parse_dsl(content: &str, format: DslFormat) -> Result<WorkflowSchema, WorkflowError> {
    let schema: WorkflowSchema = match format {
        DslFormat::Yaml => serde_yaml::from_str(content)
            .map_err(|e| WorkflowError::DslParseError(e.to_string()))?,
        DslFormat::Json => serde_json::from_str(content)
            .map_err(|e| WorkflowError::DslParseError(e.to_string()))?,
        DslFormat::Toml => {
            // TOML → toml::Value → serde_json::Value so that fields typed as
            // serde_json::Value (condition values, defaults) keep their shape.
            let toml_val: toml::Value = toml::from_str(content)
                .map_err(|e| WorkflowError::DslParseError(e.to_string()))?;
            serde_json::from_value(toml_value_to_json(toml_val))
                .map_err(|e| WorkflowError::DslParseError(e.to_string()))?
        }
    };

    if !SUPPORTED_DSL_VERSIONS.contains(&schema.version.as_str()) {
        return Err(WorkflowError::DslParseError(format!(
            "unsupported DSL version '{}', expected one of {:?}",
            schema.version, SUPPORTED_DSL_VERSIONS
        )));
    }
    Ok(schema)
}

/// Read a workflow file, selecting the format from its extension.
pub fn parse_dsl_file(path: impl AsRef<Path>) -> Result<WorkflowSchema, WorkflowError> {
    let path = path.as_ref();
    let format = DslFormat::from_path(path).ok_or_else(|| {
        WorkflowError::DslParseError(format!("unknown DSL file extension: {}", path.display()))
    })?;
    let content = std::fs::read_to_string(path)
        .map_err(|e| WorkflowError::DslParseError(format!("{}: {}", path.display(), e)))?;
    parse_dsl(&content, format)
}

/// Convert a [`toml::Value`] into a [`serde_json::Value`].
///
/// TOML has no null type; `Datetime` values are stringified.
pub(crate) fn toml_value_to_json(val: toml::Value) -> serde_json::Value {
    match val {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_value_to_json).collect())
        }
        toml::Value::Table(tbl) => {
            let map: serde_json::Map<String, serde_json::Value> = tbl
                .into_iter()
                .map(|(k, v)| (k, toml_value_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}
