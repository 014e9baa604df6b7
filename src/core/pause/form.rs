use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::repository::PauseError;
use crate::dsl::schema::{FormInput, UserAction};

#[derive(Debug, Clone)]
pub struct FormCreateParams {
    pub workflow_execution_id: String,
    pub node_id: String,
    pub form_content: String,
    pub inputs: Vec<FormInput>,
    pub user_actions: Vec<UserAction>,
}

/// A human input form waiting for (or holding) a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormEntity {
    pub id: String,
    pub workflow_execution_id: String,
    pub node_id: String,
    pub form_content: String,
    pub inputs: Vec<FormInput>,
    pub user_actions: Vec<UserAction>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSubmission {
    pub form_id: String,
    pub action: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub submitted_at: DateTime<Utc>,
}

#[async_trait]
pub trait FormRepository: Send + Sync {
    async fn create_form(&self, params: FormCreateParams) -> Result<FormEntity, PauseError>;
    /// The form a node created within one execution, if any.
    async fn get_form(
        &self,
        workflow_execution_id: &str,
        node_id: &str,
    ) -> Result<Option<FormEntity>, PauseError>;
    async fn get_submission(&self, form_id: &str) -> Result<Option<FormSubmission>, PauseError>;
}

#[derive(Default)]
pub struct MemoryFormRepository {
    forms: tokio::sync::RwLock<HashMap<String, FormEntity>>,
    submissions: tokio::sync::RwLock<HashMap<String, FormSubmission>>,
}

impl MemoryFormRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submission, as a host UI would.
    pub async fn submit(
        &self,
        form_id: &str,
        action: impl Into<String>,
        data: HashMap<String, Value>,
    ) -> Result<(), PauseError> {
        if !self.forms.read().await.contains_key(form_id) {
            return Err(PauseError::NotFound(form_id.to_string()));
        }
        self.submissions.write().await.insert(
            form_id.to_string(),
            FormSubmission {
                form_id: form_id.to_string(),
                action: action.into(),
                data,
                submitted_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[async_trait]
impl FormRepository for MemoryFormRepository {
    async fn create_form(&self, params: FormCreateParams) -> Result<FormEntity, PauseError> {
        let form = FormEntity {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_execution_id: params.workflow_execution_id,
            node_id: params.node_id,
            form_content: params.form_content,
            inputs: params.inputs,
            user_actions: params.user_actions,
            created_at: Utc::now(),
        };
        self.forms.write().await.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    async fn get_form(
        &self,
        workflow_execution_id: &str,
        node_id: &str,
    ) -> Result<Option<FormEntity>, PauseError> {
        Ok(self
            .forms
            .read()
            .await
            .values()
            .find(|f| f.workflow_execution_id == workflow_execution_id && f.node_id == node_id)
            .cloned())
    }

    async fn get_submission(&self, form_id: &str) -> Result<Option<FormSubmission>, PauseError> {
        Ok(self.submissions.read().await.get(form_id).cloned())
    }
}
