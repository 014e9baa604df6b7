use regex::Regex;

use crate::core::variable_pool::VariablePool;
use crate::domain::model::Selector;
use crate::error::NodeError;

const REFERENCE_PATTERN: &str = r"\{\{#([^#]+)#\}\}";

fn reference_regex() -> Result<Regex, NodeError> {
    Regex::new(REFERENCE_PATTERN).map_err(|e| NodeError::TemplateError(e.to_string()))
}

/// Replace every `{{#node_id.variable#}}` reference in `text` with the
/// display form of the pool value. Missing variables render as empty.
pub fn resolve_variables(text: &str, pool: &VariablePool) -> Result<String, NodeError> {
    let re = reference_regex()?;
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for cap in re.captures_iter(text) {
        let (Some(whole), Some(inner)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        match Selector::parse_str(inner.as_str().trim()) {
            Some(selector) => {
                if let Some(value) = pool.get(&selector) {
                    out.push_str(&value.to_display_string());
                }
            }
            None => out.push_str(whole.as_str()),
        }
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// All selectors referenced as `{{#...#}}` in `text`, in order.
pub fn extract_selectors(text: &str) -> Result<Vec<Selector>, NodeError> {
    let re = reference_regex()?;
    Ok(re
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .filter_map(|m| Selector::parse_str(m.as_str().trim()))
        .collect())
}
