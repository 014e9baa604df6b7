use std::collections::HashMap;

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

use crate::error::NodeError;

/// Jinja2-compatible text templates, backed by minijinja.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// A lenient engine: undefined variables render as empty strings.
    pub fn new() -> Self {
        Self::with_strict(false)
    }

    /// With `strict`, referencing an undefined variable is a render error.
    pub fn with_strict(strict: bool) -> Self {
        let mut env = Environment::new();
        if strict {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        }

        env.add_filter("default", default_filter);
        env.add_filter("upper", upper_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("trim", trim_filter);

        TemplateEngine { env }
    }

    pub fn render_template(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, NodeError> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| NodeError::TemplateError(format!("Template compile error: {}", e)))?;

        let ctx = minijinja::Value::from_serialize(variables);

        tmpl.render(ctx)
            .map_err(|e| NodeError::TemplateError(format!("Template render error: {}", e)))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_filter(value: minijinja::Value, default: Option<minijinja::Value>) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or_else(|| minijinja::Value::from(""))
    } else {
        value
    }
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn trim_filter(value: String) -> String {
    value.trim().to_string()
}
