//! Protocol-stable model types shared across layers.

mod condition;
mod pause;
mod selector;

pub use condition::{Case, ComparisonOperator, Condition, IterationErrorMode, LogicalOperator};
pub use pause::{PauseDetail, PauseType};
pub use selector::{Selector, SYSTEM_VARIABLE_NODE_ID};
