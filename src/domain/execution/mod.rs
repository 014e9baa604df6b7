//! Execution values and status types.

mod segment;
mod status;

pub use segment::{FileSegment, FileTransferMethod, Segment};
pub use status::{ExecutionStatus, RuntimeNodeStatus, WorkflowNodeExecutionStatus};
