//! Engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dsl::parser::toml_value_to_json;
use crate::error::WorkflowError;

/// Configuration for the workflow engine
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of node starts per run.
    pub max_steps: i32,
    pub max_execution_time_secs: u64,
    /// Maximum nesting depth of container runs.
    pub max_call_depth: u32,
    pub parallel_enabled: bool,
    /// Upper bound on concurrently running nodes; 0 means unlimited.
    pub max_concurrency: usize,
    pub min_workers: usize,
    /// Ready backlog above which the worker limit grows.
    pub scale_up_threshold: usize,
    /// How long the dispatcher waits for an event before checking
    /// commands and scaling.
    pub idle_timeout_ms: u64,
    pub template_max_output_length: usize,
    pub strict_template: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: 500,
            max_execution_time_secs: 600,
            max_call_depth: 5,
            parallel_enabled: true,
            max_concurrency: 0,
            min_workers: 1,
            scale_up_threshold: 3,
            idle_timeout_ms: 100,
            template_max_output_length: 400_000,
            strict_template: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, WorkflowError> {
        let value: toml::Value =
            toml::from_str(content).map_err(|e| WorkflowError::ConfigError(e.to_string()))?;
        serde_json::from_value(toml_value_to_json(value))
            .map_err(|e| WorkflowError::ConfigError(e.to_string()))
    }

    pub fn from_json_str(content: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(content).map_err(|e| WorkflowError::ConfigError(e.to_string()))
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WorkflowError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkflowError::ConfigError(format!("{}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(WorkflowError::ConfigError(format!(
                "unsupported config file: {}",
                path.display()
            ))),
        }
    }

    /// Defaults overridden by the `WORKFLOW_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "ignoring unparsable engine setting");
                    None
                }
            }
        }

        if let Some(v) = parse("WORKFLOW_MAX_EXECUTION_STEPS", lookup("WORKFLOW_MAX_EXECUTION_STEPS")) {
            self.max_steps = v;
        }
        if let Some(v) = parse("WORKFLOW_MAX_EXECUTION_TIME", lookup("WORKFLOW_MAX_EXECUTION_TIME")) {
            self.max_execution_time_secs = v;
        }
        if let Some(v) = parse("WORKFLOW_CALL_MAX_DEPTH", lookup("WORKFLOW_CALL_MAX_DEPTH")) {
            self.max_call_depth = v;
        }
        if let Some(v) = parse("WORKFLOW_MAX_CONCURRENCY", lookup("WORKFLOW_MAX_CONCURRENCY")) {
            self.max_concurrency = v;
        }
        self
    }
}
