pub mod engine;
pub mod variable_resolver;

pub use engine::TemplateEngine;
pub use variable_resolver::{extract_selectors, resolve_variables};
