// switchyard/src/session/routing.rs

//! Continuation after a reply: export merge, route selection and completion.

use super::Session;
use crate::conditional::check_loop_condition;
use crate::config::export::export_function_context;
use crate::core::context_data::Ctx;
use crate::core::control::{ErrorPolicy, HookPoint, Route};
use crate::core::interpolate::interpolate;
use crate::core::message::{Message, Status};
use crate::error::{WorkflowError, WorkflowResult};
use crate::store::SessionResult;
use crate::workflow::{Action, BoundWorkflow};
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{event, Level};

const OUTPUT_KEY: &str = "_output";

/// The outcome of `route_next`.
#[derive(Debug, Clone, PartialEq)]
pub struct Routing {
  pub route: Route,
  /// The message the route proceeds with. For a finished parallel iteration this is
  /// the first non-success child reply, if there was one.
  pub msg: Message,
  /// The pooled parallel item admitted by this reply.
  pub admit: Option<usize>,
}

impl Routing {
  fn to(route: Route, msg: Message) -> Self {
    Routing { route, msg, admit: None }
  }
}

fn aborts(bound: &BoundWorkflow, status: Status) -> bool {
  match status {
    Status::Error => bound.error_policy() != ErrorPolicy::Continue,
    Status::Failure => bound.failure_policy() == ErrorPolicy::Exit,
    Status::Success => false,
  }
}

impl Session {
  /// Entry point for every reply: child exports, hook return, else return, function
  /// export, then the route. `reporter` is the child session that finished, if the
  /// reply comes from one.
  ///
  /// While a hook runs only the hook child's reply resumes the session. Replies from
  /// other children (threads still out after an abort) are absorbed: their exports
  /// merge, their status is ignored.
  pub(crate) fn continue_exec(
    self: &Arc<Self>,
    msg: Message,
    exports: Vec<Ctx>,
    reporter: Option<&Session>,
  ) -> WorkflowResult<()> {
    let (finished, hook, from_hook, in_else) = {
      let mut st = self.state.lock();
      let from_hook = match (reporter, &st.hook_child) {
        (Some(reporter), Some(child)) => std::ptr::eq(reporter, child.as_ptr()),
        _ => false,
      };
      if from_hook {
        st.hook_child = None;
      }
      (st.finished, st.current_hook, from_hook, st.in_else_branch)
    };
    if finished {
      event!(Level::WARN, session = %self.log_id(), "Reply for a finished session dropped.");
      return Ok(());
    }
    if !from_hook && reporter.map_or(false, Session::is_hook) {
      event!(Level::WARN, session = %self.log_id(), "Reply from a stale hook dropped.");
      return Ok(());
    }

    for delta in &exports {
      self.merge_context(delta);
    }

    if let Some(hook) = hook {
      if from_hook {
        return self.continue_after_hook(hook, msg);
      }
      event!(
        Level::DEBUG,
        session = %self.log_id(),
        %hook,
        status = %msg.status(),
        "Reply absorbed while a hook runs."
      );
      return Ok(());
    }
    if in_else {
      self.state.lock().in_else_branch = false;
      return self.complete(msg);
    }
    if self.done.is_cancelled() {
      return self.complete(Message::reply(Status::Error, Some("session cancelled"), msg.payload));
    }

    self.process_export(&msg)?;

    let routing = self.route_next(msg)?;
    event!(Level::DEBUG, session = %self.log_id(), route = ?routing.route, status = %routing.msg.status(), "Route chosen.");
    match routing.route {
      Route::Complete => self.complete(routing.msg),
      Route::NextStep => self.execute_action(routing.msg),
      Route::NextThread => Ok(()),
      Route::NextIteration => self.execute_iteration(routing.msg),
      Route::NextParallelIteration => match routing.admit {
        Some(index) => self.spawn_iteration_child(index, &routing.msg),
        None => Ok(()),
      },
      Route::NextRound => self.execute_round(routing.msg),
    }
  }

  /// Merges the export of the function call this reply answers, if any.
  pub(crate) fn process_export(&self, msg: &Message) -> WorkflowResult<()> {
    let in_fly = self.state.lock().in_fly_function.take();
    if let Some(function) = in_fly {
      let env = self.env_data(msg);
      let delta = export_function_context(&function, &env, msg.status())?;
      self.merge_context(&delta);
    }
    Ok(())
  }

  /// Chooses exactly one route for a reply and advances the cursors it implies.
  pub fn route_next(&self, msg: Message) -> WorkflowResult<Routing> {
    let bound = self.bound()?;
    let parallel = bound.is_parallel_iteration();

    if !parallel && aborts(bound, msg.status()) {
      return Ok(Routing::to(Route::Complete, msg));
    }

    if !parallel {
      match &bound.action {
        Action::Steps(steps) => {
          let mut st = self.state.lock();
          if st.current + 1 < steps.len() {
            st.current += 1;
            return Ok(Routing::to(Route::NextStep, msg));
          }
        }
        Action::Threads(threads) => {
          let reported = self.threads_reported.fetch_add(1, Ordering::SeqCst) + 1;
          if reported < threads.len() {
            return Ok(Routing::to(Route::NextThread, msg));
          }
        }
        _ => {}
      }
    }

    let mut msg = msg;
    if let Some(iteration) = &bound.iteration {
      if iteration.parallel {
        let mut pool = self.pool.lock();
        pool.completed += 1;
        if msg.status() != Status::Success && pool.out.is_none() {
          pool.out = Some(msg.clone());
        }
        if pool.completed < iteration.items.len() {
          let admit = if pool.admitted < iteration.items.len() {
            pool.admitted += 1;
            Some(pool.admitted - 1)
          } else {
            None
          };
          return Ok(Routing {
            route: Route::NextParallelIteration,
            msg,
            admit,
          });
        }
        if let Some(out) = pool.out.take() {
          msg = out;
        }
        drop(pool);
        if aborts(bound, msg.status()) {
          return Ok(Routing::to(Route::Complete, msg));
        }
      } else {
        let mut st = self.state.lock();
        if st.iteration + 1 < iteration.items.len() {
          st.iteration += 1;
          st.current = 0;
          return Ok(Routing::to(Route::NextIteration, msg));
        }
      }
    }

    if bound.is_loop() {
      let env = self.env_data(&msg);
      if check_loop_condition(&bound.deferred.loop_conditions, &env)? {
        self.state.lock().loop_count += 1;
        return Ok(Routing::to(Route::NextRound, msg));
      }
    }

    Ok(Routing::to(Route::Complete, msg))
  }

  /// Applies the workflow-level export, runs the completion hooks, then finishes.
  pub(crate) fn complete(self: &Arc<Self>, msg: Message) -> WorkflowResult<()> {
    let status = msg.status();
    let export_now = {
      let mut st = self.state.lock();
      if st.finished {
        return Ok(());
      }
      !std::mem::replace(&mut st.completion_exported, true)
    };
    if export_now {
      self.apply_workflow_export(&msg, status)?;
    }

    if self.fire_hook(HookPoint::for_status(status), &msg)? {
      return Ok(());
    }
    if self.fire_hook(HookPoint::OnExit, &msg)? {
      return Ok(());
    }
    self.finish(msg);
    Ok(())
  }

  fn apply_workflow_export(&self, msg: &Message, status: Status) -> WorkflowResult<()> {
    let Some(bound) = self.bound.get() else {
      return Ok(());
    };
    let env = self.env_data(msg);
    for template in bound.deferred.exports.select(status) {
      match interpolate(template, &env)? {
        Value::Object(delta) => self.merge_context(&delta),
        Value::Null => {}
        other => {
          return Err(WorkflowError::InvalidDefinition {
            workflow: bound.name.clone(),
            message: format!("export must be a map, got {other}"),
          })
        }
      }
    }
    Ok(())
  }

  /// Deregisters the session and reports to the parent or, for a root session, to
  /// the host. Runs at most once.
  pub(super) fn finish(self: &Arc<Self>, msg: Message) {
    let exported = {
      let mut st = self.state.lock();
      if st.finished {
        return;
      }
      st.finished = true;
      std::mem::take(&mut st.exported)
    };
    if let Some(id) = self.id() {
      self.store.deregister(id);
    }
    self.done.cancel();

    let status = msg.status();
    event!(
      Level::INFO,
      session = %self.log_id(),
      %status,
      reason = msg.reason().unwrap_or_default(),
      "Session completed."
    );

    match self.parent {
      Some(parent) => self.store.continue_by_id(parent, msg, exported, Some(&**self)),
      None => {
        if let Some(output) = self.ctx.get(OUTPUT_KEY) {
          self.store.emit_result(SessionResult {
            event_id: self.event_id.clone(),
            workflow: self.template.name.clone(),
            status,
            reason: msg.reason().map(str::to_string),
            output,
          });
        }
      }
    }
  }
}
