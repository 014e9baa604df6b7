//! Domain layer: pure value types shared by the DSL, graph and engine.
//!
//! Submodules:
//! - [`execution`]: variable values and execution status models.
//! - [`model`]: protocol-stable types (selectors, conditions, pause reasons).

pub mod execution;
pub mod model;
