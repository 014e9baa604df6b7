//! Execution IO value types shared across layers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ================================
// Segment – typed variable values
// ================================

/// A dynamically-typed variable value stored in the [`VariablePool`](crate::core::VariablePool).
///
/// The serde representation is tagged (`{"value_type": ..., "value": ...}`)
/// so that pause snapshots restore the exact variant. Use
/// [`to_value`](Segment::to_value) / [`from_value`](Segment::from_value)
/// for plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(tag = "value_type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    #[default]
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(HashMap<String, Segment>),
    ArrayString(Vec<String>),
    Array(Vec<Segment>),
    File(FileSegment),
    ArrayFile(Vec<FileSegment>),
}

/// How a file reference was supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileTransferMethod {
    #[default]
    RemoteUrl,
    LocalFile,
    ToolFile,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

/// Serializable file reference used by File-type variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSegment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub transfer_method: FileTransferMethod,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Default for FileSegment {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            size: 0,
            mime_type: default_mime_type(),
            transfer_method: FileTransferMethod::default(),
            url: None,
            extension: None,
        }
    }
}

impl Segment {
    /// Convert Segment → serde_json::Value
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => serde_json::json!(*i),
            Segment::Float(f) => serde_json::json!(*f),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => {
                let m: serde_json::Map<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect();
                Value::Object(m)
            }
            Segment::ArrayString(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
            Segment::Array(v) => Value::Array(v.iter().map(|s| s.to_value()).collect()),
            Segment::File(file) => serde_json::to_value(file).unwrap_or(Value::Null),
            Segment::ArrayFile(files) => Value::Array(
                files
                    .iter()
                    .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// Create Segment from serde_json::Value
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else {
                    Segment::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => {
                if arr.is_empty() {
                    return Segment::Array(Vec::new());
                }
                if arr.iter().all(|v| v.is_string()) {
                    let items = arr
                        .iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect();
                    Segment::ArrayString(items)
                } else {
                    Segment::Array(arr.iter().map(Segment::from_value).collect())
                }
            }
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    /// Type name used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Segment::None => "none",
            Segment::String(_) => "string",
            Segment::Integer(_) | Segment::Float(_) => "number",
            Segment::Boolean(_) => "boolean",
            Segment::Object(_) => "object",
            Segment::ArrayString(_) => "array[string]",
            Segment::Array(_) => "array",
            Segment::File(_) => "file",
            Segment::ArrayFile(_) => "array[file]",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Segment::String(s) => Some(s.clone()),
            Segment::Integer(i) => Some(i.to_string()),
            Segment::Float(f) => Some(f.to_string()),
            Segment::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            other => serde_json::to_string(&other.to_value()).unwrap_or_default(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            Segment::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Segment::Boolean(b) => Some(*b),
            Segment::String(s) => match s.to_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Items of an array-like segment, `None` for scalars and objects.
    pub fn array_items(&self) -> Option<Vec<Segment>> {
        match self {
            Segment::Array(items) => Some(items.clone()),
            Segment::ArrayString(items) => {
                Some(items.iter().cloned().map(Segment::String).collect())
            }
            Segment::ArrayFile(files) => Some(files.iter().cloned().map(Segment::File).collect()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Segment::None => true,
            Segment::String(s) => s.is_empty(),
            Segment::ArrayString(v) => v.is_empty(),
            Segment::Array(v) => v.is_empty(),
            Segment::ArrayFile(v) => v.is_empty(),
            Segment::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::None, Segment::None) => true,
            (Segment::String(a), Segment::String(b)) => a == b,
            (Segment::Integer(a), Segment::Integer(b)) => a == b,
            (Segment::Float(a), Segment::Float(b)) => (a - b).abs() < 1e-10,
            (Segment::Integer(a), Segment::Float(b)) | (Segment::Float(b), Segment::Integer(a)) => {
                (*a as f64 - b).abs() < 1e-10
            }
            (Segment::Boolean(a), Segment::Boolean(b)) => a == b,
            (Segment::ArrayString(a), Segment::ArrayString(b)) => a == b,
            (Segment::File(a), Segment::File(b)) => a == b,
            _ => self.to_value() == other.to_value(),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Segment::String(value.to_string())
    }
}

impl From<String> for Segment {
    fn from(value: String) -> Self {
        Segment::String(value)
    }
}

impl From<i64> for Segment {
    fn from(value: i64) -> Self {
        Segment::Integer(value)
    }
}

impl From<bool> for Segment {
    fn from(value: bool) -> Self {
        Segment::Boolean(value)
    }
}
