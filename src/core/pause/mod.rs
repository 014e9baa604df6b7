//! Durable pauses and human input forms.

mod entity;
mod form;
mod repository;

pub use entity::{PauseEntity, WorkflowPauseEntity};
pub use form::{FormCreateParams, FormEntity, FormRepository, FormSubmission, MemoryFormRepository};
pub use repository::{FilePauseRepository, MemoryPauseRepository, PauseError, PauseRepository};
