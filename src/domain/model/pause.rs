use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a run (or one of its nodes) was suspended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PauseType {
    /// A human input node is waiting for a form submission.
    HumanInputPause { form_id: String },
    /// The host asked the engine to stop scheduling.
    SchedulingPause {},
}

/// One pause reason, persisted with the pause entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_node_id: Option<String>,
    pub pause_type: PauseType,
    pub paused_at: DateTime<Utc>,
}

impl PauseDetail {
    pub fn scheduling(paused_at: DateTime<Utc>) -> Self {
        Self {
            node_id: None,
            runtime_node_id: None,
            pause_type: PauseType::SchedulingPause {},
            paused_at,
        }
    }
}
