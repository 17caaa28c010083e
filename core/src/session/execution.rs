// switchyard/src/session/execution.rs

//! Execution dispatch: gate check, rounds, iteration items and the action itself.
//!
//! Every function here returns as soon as something has been dispatched. Child
//! sessions run synchronously on the caller, except threads, parallel iteration
//! children and hooks, which each get their own task. Cursors are updated before a
//! child is started because a synchronous child may report back before `execute`
//! returns.

use super::Session;
use crate::conditional::{check_condition, check_loop_condition};
use crate::core::context_data::Ctx;
use crate::core::control::HookPoint;
use crate::core::interpolate::interpolate;
use crate::core::message::{
  Message, Status, CHANNEL_EVENTBUS, LABEL_EVENT_ID, LABEL_SESSION_ID, SUBJECT_COMMAND,
};
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::{Action, Function, Workflow};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{event, Level};

const CURRENT_KEY: &str = "current";
const STEP_NUMBER_KEY: &str = "step_number";
const THREAD_NUMBER_KEY: &str = "thread_number";
pub(super) const RESUME_TOKEN_KEY: &str = "resume_token";

fn extra(key: &str, value: Value) -> Ctx {
  let mut ctx = Ctx::new();
  ctx.insert(key.to_string(), value);
  ctx
}

impl Session {
  /// Starts the session: `on_session` hook, then the gate and loop conditions.
  pub(crate) fn execute(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    if self.fire_hook(HookPoint::OnSession, &msg)? {
      return Ok(());
    }

    let bound = self.bound()?;
    let env = self.env_data(&msg);
    let gate = check_condition(&bound.gate, &env["ctx"]);
    let looping = gate && check_loop_condition(&bound.deferred.loop_conditions, &env)?;

    if gate && looping {
      if bound.iteration.as_ref().map_or(false, |it| it.items.is_empty()) {
        event!(Level::DEBUG, session = %self.log_id(), "Nothing to iterate.");
        return self.noop();
      }
      self.save()?;
      event!(Level::INFO, session = %self.log_id(), event_id = %self.event_id, "Session started.");
      if self.parent.is_none() {
        let session = Arc::clone(self);
        self
          .store
          .spawn_guarded(Arc::clone(self), msg.clone(), move || session.execute_round(msg));
        return Ok(());
      }
      return self.execute_round(msg);
    }

    if !gate {
      if let Some(else_branch) = bound.deferred.else_branch.clone() {
        return self.execute_else(&else_branch, msg);
      }
    }
    event!(Level::DEBUG, session = %self.log_id(), gate, "Conditions not met, skipping.");
    self.noop()
  }

  fn execute_else(self: &Arc<Self>, else_branch: &Value, msg: Message) -> WorkflowResult<()> {
    let wf = match else_branch {
      Value::String(name) => self.store.config().workflow(name)?,
      Value::Object(_) => {
        let mut wf = Workflow::from_value(else_branch.clone()).map_err(|e| WorkflowError::InvalidDefinition {
          workflow: self.template.name.clone(),
          message: format!("else: {e}"),
        })?;
        if wf.name.is_empty() {
          wf.name = format!("{}.else", self.template.name);
        }
        wf
      }
      other => {
        return Err(WorkflowError::InvalidDefinition {
          workflow: self.template.name.clone(),
          message: format!("else must be a workflow or a workflow name, got {other}"),
        })
      }
    };
    self.save()?;
    self.state.lock().in_else_branch = true;
    event!(Level::DEBUG, session = %self.log_id(), "Running else branch.");
    let child = self.create_child(wf, &msg, Ctx::new(), false)?;
    child.execute(msg)
  }

  /// Starts one loop round from its first item and first step.
  pub(crate) fn execute_round(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    let loop_count = {
      let mut st = self.state.lock();
      st.iteration = 0;
      st.current = 0;
      st.loop_count
    };
    if loop_count == 0 && self.fire_hook(HookPoint::OnFirstRound, &msg)? {
      return Ok(());
    }
    if self.fire_hook(HookPoint::OnRound, &msg)? {
      return Ok(());
    }

    if matches!(self.bound()?.action, Action::Wait(_)) {
      let has_token = self
        .ctx
        .get_str(RESUME_TOKEN_KEY)
        .map_or(false, |token| !token.is_empty());
      if !has_token {
        let id = self.save()?;
        let token = format!("/{}/{}", self.template.name, id);
        self.ctx.insert(RESUME_TOKEN_KEY, Value::String(token));
      }
    }

    event!(Level::DEBUG, session = %self.log_id(), round = loop_count, "Round started.");
    self.execute_iteration(msg)
  }

  /// Runs the action for the current serial item, or admits the parallel children.
  pub(crate) fn execute_iteration(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    let bound = self.bound()?;
    let Some(iteration) = &bound.iteration else {
      return self.execute_action(msg);
    };
    if iteration.parallel {
      return self.start_parallel_iteration(msg);
    }

    let (index, loop_count) = {
      let st = self.state.lock();
      (st.iteration, st.loop_count)
    };
    let item = iteration.items.get(index).cloned().ok_or_else(|| {
      WorkflowError::Internal(format!("iteration index {index} out of range in '{}'", bound.name))
    })?;
    self.ctx.insert(CURRENT_KEY, item.clone());
    if let Some(alias) = &iteration.alias {
      self.ctx.insert(alias.clone(), item);
    }

    if index == 0 && loop_count == 0 && self.fire_hook(HookPoint::OnFirstItem, &msg)? {
      return Ok(());
    }
    if self.fire_hook(HookPoint::OnItem, &msg)? {
      return Ok(());
    }
    self.execute_action(msg)
  }

  fn start_parallel_iteration(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    let admissions = match &self.bound()?.iteration {
      Some(iteration) => iteration.initial_admissions(),
      None => 0,
    };
    {
      let mut pool = self.pool.lock();
      pool.admitted = admissions;
      pool.completed = 0;
      pool.out = None;
    }
    event!(Level::DEBUG, session = %self.log_id(), admissions, "Parallel iteration started.");
    for index in 0..admissions {
      self.spawn_iteration_child(index, &msg)?;
    }
    Ok(())
  }

  /// Prepares the child for item `index` now and runs it on its own task.
  pub(super) fn spawn_iteration_child(self: &Arc<Self>, index: usize, msg: &Message) -> WorkflowResult<()> {
    let bound = self.bound()?;
    let Some(iteration) = &bound.iteration else {
      return Err(WorkflowError::Internal(format!("'{}' does not iterate", bound.name)));
    };
    let item = iteration.items.get(index).cloned().unwrap_or(Value::Null);
    let mut keys = extra(CURRENT_KEY, item.clone());
    if let Some(alias) = &iteration.alias {
      keys.insert(alias.clone(), item);
    }
    let child = self.create_child(bound.template.iteration_body(), msg, keys, false)?;
    let runner = Arc::clone(&child);
    let msg = msg.clone();
    self
      .store
      .spawn_guarded(child, msg.clone(), move || runner.execute(msg));
    Ok(())
  }

  /// Dispatches the bound action.
  pub(crate) fn execute_action(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    let bound = self.bound()?;

    if bound.action.is_dispatching() {
      let first = {
        let st = self.state.lock();
        st.current == 0 && st.iteration == 0 && st.loop_count == 0
      };
      if first && self.fire_hook(HookPoint::OnFirstAction, &msg)? {
        return Ok(());
      }
      if self.fire_hook(HookPoint::OnAction, &msg)? {
        return Ok(());
      }
    }

    match &bound.action {
      Action::None => self.continue_exec(msg, Vec::new(), None),
      Action::Workflow(name) => {
        let wf = self.store.config().workflow(name)?;
        let child = self.create_child(wf, &msg, Ctx::new(), false)?;
        child.execute(msg)
      }
      Action::Function(function) => self.call_function(function, msg),
      Action::Steps(steps) => {
        let current = self.state.lock().current;
        let step = steps.get(current).cloned().ok_or_else(|| {
          WorkflowError::Internal(format!("step {current} out of range in '{}'", bound.name))
        })?;
        event!(Level::DEBUG, session = %self.log_id(), step = current, "Running step.");
        let child = self.create_child(step, &msg, extra(STEP_NUMBER_KEY, json!(current)), false)?;
        child.execute(msg)
      }
      Action::Threads(threads) => {
        self.threads_reported.store(0, Ordering::SeqCst);
        event!(Level::DEBUG, session = %self.log_id(), threads = threads.len(), "Starting threads.");
        for (number, thread) in threads.iter().enumerate() {
          let child = self.create_child(thread.clone(), &msg, extra(THREAD_NUMBER_KEY, json!(number)), false)?;
          let runner = Arc::clone(&child);
          let msg = msg.clone();
          self
            .store
            .spawn_guarded(child, msg.clone(), move || runner.execute(msg));
        }
        Ok(())
      }
      Action::Wait(spec) => self.start_wait(*spec),
      Action::Switch { on, cases, default } => {
        let env = self.env_data(&msg);
        let key = match interpolate(on, &env)? {
          Value::String(s) => s,
          Value::Null => String::new(),
          other => other.to_string(),
        };
        let branch = cases.get(&key).cloned().or_else(|| default.as_deref().cloned());
        match branch {
          Some(wf) => {
            event!(Level::DEBUG, session = %self.log_id(), case = %key, "Switch branch selected.");
            let child = self.create_child(wf, &msg, Ctx::new(), false)?;
            child.execute(msg)
          }
          None => {
            event!(Level::DEBUG, session = %self.log_id(), case = %key, "No switch branch matched.");
            self.continue_exec(msg, Vec::new(), None)
          }
        }
      }
    }
  }

  /// Resolves the function, binds its parameters and sends the command.
  fn call_function(self: &Arc<Self>, function: &Function, msg: Message) -> WorkflowResult<()> {
    let mut resolved = self.store.config().resolve_function(function)?;
    let env = self.env_data(&msg);
    resolved.bind_parameters(&env)?;
    let id = self.save()?;

    let payload = json!({
      "function": resolved.to_payload(),
      "data": msg.payload,
      "labels": msg.labels,
      "ctx": env["ctx"],
      "event": env["event"],
    });
    let command = Message::new(CHANNEL_EVENTBUS, SUBJECT_COMMAND)
      .with_label(LABEL_SESSION_ID, id.to_string())
      .with_label(LABEL_EVENT_ID, self.event_id.clone())
      .with_payload(payload);

    event!(
      Level::DEBUG,
      session = %self.log_id(),
      driver = %resolved.driver,
      action = %resolved.raw_action,
      "Dispatching function call."
    );
    self.state.lock().in_fly_function = Some(resolved);
    self.store.send(command)
  }

  /// Creates and prepares a child session. The parent is saved first so the child
  /// can report back.
  pub(super) fn create_child(
    self: &Arc<Self>,
    wf: Workflow,
    msg: &Message,
    keys: Ctx,
    is_hook: bool,
  ) -> WorkflowResult<Arc<Session>> {
    let parent_id = self.save()?;
    let child = Session::new(self.store.clone(), self.event_id.clone(), Some(parent_id), wf, is_hook);
    child.prepare(msg, Some(self), keys)?;
    Ok(child)
  }

  /// Completes without dispatching anything. A nested session reports success to
  /// its parent.
  pub(super) fn noop(self: &Arc<Self>) -> WorkflowResult<()> {
    self.state.lock().finished = true;
    if let Some(id) = self.id() {
      self.store.deregister(id);
    }
    self.done.cancel();
    if let Some(parent) = self.parent {
      self
        .store
        .continue_by_id(parent, Message::reply(Status::Success, None, Value::Null), Vec::new(), Some(&**self));
    }
    Ok(())
  }
}
