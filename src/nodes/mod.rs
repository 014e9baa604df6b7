//! Built-in node executors.
//!
//! Each node kind implements [`NodeExecutor`]; the dispatcher looks the
//! executor up by [`NodeType`](crate::dsl::NodeType) in a
//! [`NodeExecutorRegistry`]. Which built-ins are compiled in is controlled by
//! the `builtin-*-nodes` features.

pub mod executor;
pub(crate) mod utils;

#[cfg(feature = "builtin-core-nodes")]
pub mod control_flow;
#[cfg(feature = "builtin-transform-nodes")]
pub mod data_transform;
#[cfg(feature = "builtin-subgraph-nodes")]
pub mod flow;
#[cfg(feature = "builtin-core-nodes")]
pub mod human_input;

pub use executor::{NodeExecutor, NodeExecutorRegistry};
