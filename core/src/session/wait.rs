// switchyard/src/session/wait.rs

use super::execution::RESUME_TOKEN_KEY;
use super::Session;
use crate::core::message::{Message, Status};
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::WaitSpec;
use serde_json::Value;
use std::sync::Arc;
use tracing::{event, Level};

const TIMEOUT_STATUS_KEY: &str = "timeout_status";
const RETURN_ON_TIMEOUT_KEY: &str = "return_on_timeout";

impl Session {
  /// Suspends the session under its `resume_token`. A timed wait also arms a timer
  /// that resumes it with the configured timeout status and payload.
  pub(crate) fn start_wait(self: &Arc<Self>, spec: WaitSpec) -> WorkflowResult<()> {
    let token = self
      .ctx
      .get_str(RESUME_TOKEN_KEY)
      .filter(|token| !token.is_empty())
      .ok_or_else(|| WorkflowError::MissingResumeToken {
        workflow: self.template.name.clone(),
      })?;
    let id = self.save()?;
    let suspension = self.store.suspend(&token, id)?;

    match spec {
      WaitSpec::Infinite => {
        event!(Level::INFO, session = %self.log_id(), %token, "Waiting for resume.");
      }
      WaitSpec::For(timeout) => {
        let status = match self.ctx.get_str(TIMEOUT_STATUS_KEY) {
          Some(label) if !label.trim().is_empty() => Status::from_label(Some(label.as_str())),
          _ => self.store.config().options.default_timeout_status,
        };
        let payload = self.ctx.get(RETURN_ON_TIMEOUT_KEY).unwrap_or(Value::Null);
        event!(Level::INFO, session = %self.log_id(), %token, ?timeout, "Waiting for resume or timeout.");
        self
          .store
          .arm_timeout(token, suspension, timeout, Message::reply(status, Some("timeout"), payload));
      }
    }
    Ok(())
  }
}
