use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::model::PauseDetail;

/// Read access to a persisted pause.
pub trait WorkflowPauseEntity: Send + Sync {
    fn id(&self) -> &str;
    fn workflow_execution_id(&self) -> &str;
    /// Opaque snapshot bytes produced by `GraphRuntimeState::snapshot`.
    fn get_state(&self) -> &[u8];
    fn resumed_at(&self) -> Option<DateTime<Utc>>;
    fn get_pause_details(&self) -> &[PauseDetail];
}

/// A durable pause record. One entity per pause; resuming never reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseEntity {
    pub id: String,
    pub workflow_execution_id: String,
    #[serde(with = "base64_bytes")]
    pub state: Vec<u8>,
    pub pause_details: Vec<PauseDetail>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
}

impl PauseEntity {
    pub fn new(
        id: impl Into<String>,
        workflow_execution_id: impl Into<String>,
        state: Vec<u8>,
        pause_details: Vec<PauseDetail>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_execution_id: workflow_execution_id.into(),
            state,
            pause_details,
            created_at,
            resumed_at: None,
        }
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed_at.is_some()
    }
}

impl WorkflowPauseEntity for PauseEntity {
    fn id(&self) -> &str {
        &self.id
    }

    fn workflow_execution_id(&self) -> &str {
        &self.workflow_execution_id
    }

    fn get_state(&self) -> &[u8] {
        &self.state
    }

    fn resumed_at(&self) -> Option<DateTime<Utc>> {
        self.resumed_at
    }

    fn get_pause_details(&self) -> &[PauseDetail] {
        &self.pause_details
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
