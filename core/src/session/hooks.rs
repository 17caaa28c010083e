// switchyard/src/session/hooks.rs

//! Lifecycle hooks.
//!
//! `fire_hook` is set-then-clear: the first call for a point starts the hook and
//! returns `true` (the caller stops). When the hook reports back, the interrupted
//! stage is re-entered, calls `fire_hook` for the same point again, which clears it
//! and returns `false` so the stage proceeds.

use super::Session;
use crate::core::context_data::Ctx;
use crate::core::control::HookPoint;
use crate::core::message::{Message, Status};
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::Workflow;
use serde_json::Value;
use std::sync::Arc;
use tracing::{event, Level};

impl Session {
  /// Hook workflow for `point` from `ctx.hooks`: a workflow name, a list of them (run
  /// as threads) or an inline definition.
  fn hook_workflow(&self, point: HookPoint) -> WorkflowResult<Option<Workflow>> {
    let entry = self
      .ctx
      .read()
      .get("hooks")
      .and_then(|hooks| hooks.get(point.as_str()))
      .cloned();
    let invalid = |message: String| WorkflowError::InvalidDefinition {
      workflow: format!("{}:{}", self.template.name, point),
      message,
    };

    let mut wf = match entry {
      None | Some(Value::Null) => return Ok(None),
      Some(Value::String(name)) if name.is_empty() => return Ok(None),
      Some(Value::String(name)) => Workflow::calling(name),
      Some(Value::Array(list)) if list.is_empty() => return Ok(None),
      Some(Value::Array(list)) => {
        let threads = list
          .into_iter()
          .map(|item| match item {
            Value::String(name) => Ok(Workflow::calling(name)),
            Value::Object(_) => Workflow::from_value(item).map_err(|e| invalid(e.to_string())),
            other => Err(invalid(format!("hook entries must be workflows, got {other}"))),
          })
          .collect::<WorkflowResult<Vec<_>>>()?;
        Workflow {
          threads,
          ..Default::default()
        }
      }
      Some(inline @ Value::Object(_)) => Workflow::from_value(inline).map_err(|e| invalid(e.to_string()))?,
      Some(other) => return Err(invalid(format!("hook must be a workflow name, got {other}"))),
    };
    if wf.name.is_empty() {
      wf.name = format!("{}:{}", self.template.name, point);
    }
    Ok(Some(wf))
  }

  /// Fires the hook for `point`. Returns `true` when a hook was started and the caller
  /// must stop; `false` when there is no hook, when this call clears the hook that
  /// just returned, or when another hook is active.
  pub(crate) fn fire_hook(self: &Arc<Self>, point: HookPoint, msg: &Message) -> WorkflowResult<bool> {
    {
      let mut st = self.state.lock();
      match st.current_hook {
        Some(active) if active == point => {
          st.current_hook = None;
          return Ok(false);
        }
        Some(_) => return Ok(false),
        None => {}
      }
    }

    let Some(wf) = self.hook_workflow(point)? else {
      return Ok(false);
    };

    {
      let mut st = self.state.lock();
      st.current_hook = Some(point);
      st.saved_msg = Some(msg.clone());
    }
    event!(Level::DEBUG, session = %self.log_id(), hook = %point, "Hook fired.");

    let child = match self.create_child(wf, msg, Ctx::new(), true) {
      Ok(child) => child,
      Err(err) => {
        let mut st = self.state.lock();
        st.current_hook = None;
        st.saved_msg = None;
        return Err(err);
      }
    };
    self.state.lock().hook_child = Some(Arc::downgrade(&child));
    let runner = Arc::clone(&child);
    let msg = msg.clone();
    self
      .store
      .spawn_guarded(child, msg.clone(), move || runner.execute(msg));
    Ok(true)
  }

  /// Resumes the stage a hook interrupted. A hook that did not succeed aborts the
  /// session with an `error` status.
  pub(crate) fn continue_after_hook(self: &Arc<Self>, hook: HookPoint, msg: Message) -> WorkflowResult<()> {
    let saved = self.state.lock().saved_msg.take().unwrap_or_else(|| msg.clone());

    if msg.status() != Status::Success {
      let reason = format!(
        "hook {} failed: {}",
        hook,
        msg.reason().unwrap_or(msg.status().as_str())
      );
      event!(Level::WARN, session = %self.log_id(), %hook, %reason, "Hook did not succeed.");
      {
        let mut st = self.state.lock();
        st.current_hook = None;
        st.hook_child = None;
      }
      let aborted = Message::reply(Status::Error, Some(&reason), saved.payload);
      if hook.is_completion() {
        self.finish(aborted);
        return Ok(());
      }
      return self.complete(aborted);
    }

    event!(Level::DEBUG, session = %self.log_id(), %hook, "Hook returned.");
    match hook {
      HookPoint::OnSession => self.execute(saved),
      HookPoint::OnFirstRound | HookPoint::OnRound => self.execute_round(saved),
      HookPoint::OnFirstItem | HookPoint::OnItem => self.execute_iteration(saved),
      HookPoint::OnFirstAction | HookPoint::OnAction => self.execute_action(saved),
      HookPoint::OnSuccess | HookPoint::OnFailure | HookPoint::OnError | HookPoint::OnExit => self.complete(saved),
    }
  }
}
