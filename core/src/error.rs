// switchyard/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

/// Everything that can go wrong while preparing, dispatching or routing a session.
///
/// None of these escape the engine as a panic: the store converts them into an
/// `error` status reply at the outermost entry point and completes the session.
#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("Workflow not found: {name}")]
  WorkflowNotFound { name: String },

  #[error("Named context not found: {name}")]
  ContextNotFound { name: String },

  #[error("System not found: {name}")]
  SystemNotFound { name: String },

  #[error("Function '{function}' not found in system '{system}'")]
  FunctionNotFound { system: String, function: String },

  #[error("Invalid workflow definition '{workflow}': {message}")]
  InvalidDefinition { workflow: String, message: String },

  #[error("Interpolation failed for '{template}': {message}")]
  Interpolation { template: String, message: String },

  #[error("Workflow '{workflow}' waits without a resume_token in its context")]
  MissingResumeToken { workflow: String },

  #[error("Resume token already in use: {token}")]
  ResumeTokenCollision { token: String },

  #[error("Invalid duration '{value}'")]
  InvalidDuration { value: String },

  #[error("Session not found: {id}")]
  SessionNotFound { id: String },

  #[error("Session store is full ({capacity} live sessions)")]
  StoreFull { capacity: usize },

  #[error("Host operation failed. Source: {source}")]
  Host {
    #[source]
    source: AnyhowError,
  },

  #[error("Internal engine error: {0}")]
  Internal(String),
}

impl From<AnyhowError> for WorkflowError {
  fn from(err: AnyhowError) -> Self {
    WorkflowError::Host { source: err }
  }
}

impl From<serde_json::Error> for WorkflowError {
  fn from(err: serde_json::Error) -> Self {
    WorkflowError::InvalidDefinition {
      workflow: String::from("<dynamic>"),
      message: err.to_string(),
    }
  }
}

pub type WorkflowResult<T, E = WorkflowError> = std::result::Result<T, E>;
