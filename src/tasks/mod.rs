pub mod model;
pub mod query;
pub mod service;
pub mod store;

pub use model::{ReminderRow, TaskPriority, TaskRow, TaskStatus};
pub use service::TaskService;
pub use store::{TaskPage, TaskStore};

/// A single field-level validation failure: (field name, human message).
pub type FieldError = (&'static str, String);

/// Domain errors raised at the service boundary. The REST layer maps these
/// to HTTP responses; background jobs log them.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found")]
    NotFound,
    #[error("not authorized to access this task")]
    Forbidden,
    #[error("validation failed")]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl TaskError {
    /// Shorthand for a single-field validation failure.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        TaskError::Invalid(vec![(field, message.into())])
    }
}
