//! Graph construction and representation.
//!
//! A [`Graph`] is built from a parsed [`WorkflowSchema`](crate::dsl::WorkflowSchema)
//! by [`Graph::init`], which decodes every node's typed [`NodeConfig`] and
//! validates the topology. The graph is immutable; per-run traversal state
//! is kept in [`GraphTraversal`].

pub mod builder;
pub mod node_config;
pub mod traversal;
pub mod types;

pub use node_config::{IterationNodeConfig, LoopNodeConfig, NodeConfig};
pub use traversal::{EdgeTraversalState, GraphTraversal};
pub use types::{Graph, GraphEdge, GraphNode};
