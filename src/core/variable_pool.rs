use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::execution::{FileSegment, Segment};
use crate::domain::model::{Selector, SYSTEM_VARIABLE_NODE_ID};

/// Fixed system inputs of a run, addressable as `("sys", name)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemVariables {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub workflow_execution_id: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub dialogue_count: Option<i64>,
    #[serde(default)]
    pub files: Vec<FileSegment>,
}

impl SystemVariables {
    fn segments(&self) -> Vec<(&'static str, Segment)> {
        let mut out = Vec::new();
        let strings = [
            ("user_id", &self.user_id),
            ("app_id", &self.app_id),
            ("workflow_id", &self.workflow_id),
            ("workflow_execution_id", &self.workflow_execution_id),
            ("query", &self.query),
            ("conversation_id", &self.conversation_id),
        ];
        for (name, value) in strings {
            if let Some(v) = value {
                out.push((name, Segment::String(v.clone())));
            }
        }
        if let Some(count) = self.dialogue_count {
            out.push(("dialogue_count", Segment::Integer(count)));
        }
        out.push(("files", Segment::ArrayFile(self.files.clone())));
        out
    }
}

// ================================
// VariablePool
// Key: "node_id\0variable_name"
// ================================

/// Selector-addressed store of every variable a run has produced.
///
/// A scoped child pool (used by container nodes) reads through to its
/// parent but writes only locally, so nested runs never leak into the
/// enclosing run.
#[derive(Debug, Clone, Default)]
pub struct VariablePool {
    variables: HashMap<String, Segment>,
    parent: Option<Arc<VariablePool>>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(system: &SystemVariables) -> Self {
        let mut pool = Self::new();
        for (name, value) in system.segments() {
            pool.set(&Selector::system(name), value);
        }
        pool
    }

    /// A child scope that reads through to `parent`.
    pub fn new_child(parent: Arc<VariablePool>) -> Self {
        Self {
            variables: HashMap::new(),
            parent: Some(parent),
        }
    }

    /// Rebuild a pool from [`to_entries`](Self::to_entries) output.
    pub fn from_entries(entries: HashMap<String, Segment>) -> Self {
        Self {
            variables: entries,
            parent: None,
        }
    }

    /// Build key from node_id and variable name.
    pub fn make_key(node_id: &str, var_name: &str) -> String {
        let mut key = String::with_capacity(node_id.len() + 1 + var_name.len());
        key.push_str(node_id);
        key.push('\0');
        key.push_str(var_name);
        key
    }

    fn selector_key(selector: &Selector) -> String {
        Self::make_key(selector.node_id(), selector.variable_name())
    }

    fn key_prefix(node_id: &str) -> String {
        let mut prefix = String::with_capacity(node_id.len() + 1);
        prefix.push_str(node_id);
        prefix.push('\0');
        prefix
    }

    pub fn get(&self, selector: &Selector) -> Option<&Segment> {
        let key = Self::selector_key(selector);
        self.lookup(&key)
    }

    fn lookup(&self, key: &str) -> Option<&Segment> {
        match self.variables.get(key) {
            Some(v) => Some(v),
            None => self.parent.as_ref().and_then(|p| p.lookup(key)),
        }
    }

    /// Plain JSON value at `selector`, `Null` when absent.
    pub fn get_value(&self, selector: &Selector) -> Value {
        self.get(selector).map(Segment::to_value).unwrap_or(Value::Null)
    }

    /// Check if variable exists and is not None
    pub fn has(&self, selector: &Selector) -> bool {
        self.get(selector).map_or(false, |s| !s.is_none())
    }

    pub fn set(&mut self, selector: &Selector, value: Segment) {
        self.variables.insert(Self::selector_key(selector), value);
    }

    /// Set node outputs as (node_id, key) -> value
    pub fn set_node_outputs(&mut self, node_id: &str, outputs: &HashMap<String, Segment>) {
        for (key, val) in outputs {
            self.variables
                .insert(Self::make_key(node_id, key), val.clone());
        }
    }

    /// All variables of `node_id`, local values shadowing the parent's.
    pub fn get_node_variables(&self, node_id: &str) -> HashMap<String, Segment> {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.get_node_variables(node_id))
            .unwrap_or_default();
        let prefix = Self::key_prefix(node_id);
        for (key, val) in &self.variables {
            if let Some(var) = key.strip_prefix(&prefix) {
                out.insert(var.to_string(), val.clone());
            }
        }
        out
    }

    /// Remove all local variables of a node.
    pub fn remove_node(&mut self, node_id: &str) {
        let prefix = Self::key_prefix(node_id);
        self.variables.retain(|key, _| !key.starts_with(&prefix));
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.parent.as_ref().map_or(true, |p| p.is_empty())
    }

    /// Flattened, serializable view: parent entries overlaid by local ones.
    pub fn to_entries(&self) -> HashMap<String, Segment> {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.to_entries())
            .unwrap_or_default();
        out.extend(self.variables.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    /// System variables as a plain JSON object.
    pub fn system_values(&self) -> HashMap<String, Value> {
        self.get_node_variables(SYSTEM_VARIABLE_NODE_ID)
            .into_iter()
            .map(|(k, v)| (k, v.to_value()))
            .collect()
    }
}
