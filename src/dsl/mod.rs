//! Workflow definition format: schema types and the YAML/JSON/TOML parser.

pub mod parser;
pub mod schema;

pub use parser::{parse_dsl, parse_dsl_file, DslFormat};
pub use schema::*;
