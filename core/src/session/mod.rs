// switchyard/src/session/mod.rs

//! One live workflow execution.
//!
//! A session never blocks waiting for a reply. Dispatching an action returns right
//! away, and the reply re-enters the session through `SessionStore::continue_session`,
//! which calls `continue_exec` to merge the result and pick the next `Route`.
//!
//! Locking: `ctx` (the context lock), `state` and `pool` (the iteration lock) are
//! separate `parking_lot` locks. None of them is held while calling into another
//! session or into the store, since a synchronous child may report back to its
//! parent on the same stack.

mod execution;
mod hooks;
mod prepare;
mod routing;
mod wait;

pub use routing::Routing;

use crate::config::ResolvedFunction;
use crate::core::context_data::{ContextData, Ctx};
use crate::core::control::HookPoint;
use crate::core::merge::strip_no_export;
use crate::core::message::{Message, Status};
use crate::error::{WorkflowError, WorkflowResult};
use crate::store::{SessionId, SessionStore};
use crate::workflow::{BoundWorkflow, Workflow};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

/// Cursor and bookkeeping state, guarded by one mutex.
#[derive(Debug, Default)]
struct SessionState {
  /// Index of the current step.
  current: usize,
  /// Index of the current serial iteration item.
  iteration: usize,
  loop_count: usize,
  /// Deltas merged into `ctx` that bubble up to the parent on completion.
  exported: Vec<Ctx>,
  current_hook: Option<HookPoint>,
  /// The child running the active hook. Only its reply ends the hook.
  hook_child: Option<Weak<Session>>,
  /// The message that was being handled when the active hook fired.
  saved_msg: Option<Message>,
  /// Set while the `else` branch child runs.
  in_else_branch: bool,
  in_fly_function: Option<ResolvedFunction>,
  event: Value,
  loaded_contexts: HashSet<String>,
  completion_exported: bool,
  finished: bool,
}

/// Admission bookkeeping for `iterate_parallel`, guarded by the iteration lock.
#[derive(Debug, Default)]
struct ParallelPool {
  admitted: usize,
  completed: usize,
  /// First non-success reply from a child; it decides the final status.
  out: Option<Message>,
}

/// A point-in-time view of a live session, for operational APIs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
  pub id: Option<String>,
  pub parent: Option<String>,
  pub event_id: String,
  pub workflow: String,
  pub description: String,
  pub is_hook: bool,
  pub current_hook: Option<String>,
  pub step: usize,
  pub iteration: usize,
  pub loop_count: usize,
  pub age_ms: u128,
}

pub struct Session {
  store: SessionStore,
  id: OnceCell<SessionId>,
  event_id: String,
  parent: Option<SessionId>,
  is_hook: bool,
  template: Workflow,
  bound: OnceCell<BoundWorkflow>,
  ctx: ContextData<Ctx>,
  state: Mutex<SessionState>,
  threads_reported: AtomicUsize,
  pool: Mutex<ParallelPool>,
  done: CancellationToken,
  started: Instant,
}

impl std::fmt::Debug for Session {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Session")
      .field("id", &self.id.get())
      .field("event_id", &self.event_id)
      .field("workflow", &self.template.name)
      .field("parent", &self.parent)
      .field("is_hook", &self.is_hook)
      .finish()
  }
}

impl Session {
  pub(crate) fn new(
    store: SessionStore,
    event_id: impl Into<String>,
    parent: Option<SessionId>,
    template: Workflow,
    is_hook: bool,
  ) -> Arc<Self> {
    Arc::new(Session {
      store,
      id: OnceCell::new(),
      event_id: event_id.into(),
      parent,
      is_hook,
      template,
      bound: OnceCell::new(),
      ctx: ContextData::new(Ctx::new()),
      state: Mutex::new(SessionState::default()),
      threads_reported: AtomicUsize::new(0),
      pool: Mutex::new(ParallelPool::default()),
      done: CancellationToken::new(),
      started: Instant::now(),
    })
  }

  /// The registry ID, once the session has been saved.
  pub fn id(&self) -> Option<SessionId> {
    self.id.get().copied()
  }

  pub fn event_id(&self) -> &str {
    &self.event_id
  }

  pub fn workflow_name(&self) -> &str {
    &self.template.name
  }

  pub fn parent(&self) -> Option<SessionId> {
    self.parent
  }

  pub fn is_hook(&self) -> bool {
    self.is_hook
  }

  /// The session context. Clones share the underlying data.
  pub fn ctx(&self) -> ContextData<Ctx> {
    self.ctx.clone()
  }

  pub fn is_finished(&self) -> bool {
    self.state.lock().finished
  }

  /// A token cancelled when the session completes (or is cancelled).
  pub fn watch(&self) -> CancellationToken {
    self.done.child_token()
  }

  /// Requests cooperative cancellation. In-flight calls are not interrupted; the next
  /// reply completes the session with an `error` status.
  pub fn cancel(&self) {
    event!(Level::INFO, session = %self.log_id(), "Session cancellation requested.");
    self.done.cancel();
  }

  pub fn summary(&self) -> SessionSummary {
    let st = self.state.lock();
    SessionSummary {
      id: self.id().map(|id| id.to_string()),
      parent: self.parent.map(|id| id.to_string()),
      event_id: self.event_id.clone(),
      workflow: self.template.name.clone(),
      description: self
        .bound
        .get()
        .map(|b| b.description.clone())
        .unwrap_or_else(|| self.template.description.clone()),
      is_hook: self.is_hook,
      current_hook: st.current_hook.map(|h| h.as_str().to_string()),
      step: st.current,
      iteration: st.iteration,
      loop_count: st.loop_count,
      age_ms: self.started.elapsed().as_millis(),
    }
  }

  pub(crate) fn age_ms(&self) -> u128 {
    self.started.elapsed().as_millis()
  }

  fn log_id(&self) -> String {
    match self.id() {
      Some(id) => format!("{}#{}", self.template.name, id),
      None => format!("{}#unsaved", self.template.name),
    }
  }

  fn bound(&self) -> WorkflowResult<&BoundWorkflow> {
    self
      .bound
      .get()
      .ok_or_else(|| WorkflowError::Internal(format!("session '{}' used before prepare", self.template.name)))
  }

  /// Registers the session in the store (once) so replies can find it.
  fn save(self: &Arc<Self>) -> WorkflowResult<SessionId> {
    self.id.get_or_try_init(|| self.store.register(Arc::clone(self))).copied()
  }

  /// The interpolation environment: `{ctx, data, labels, event}`.
  pub(crate) fn env_data(&self, msg: &Message) -> Value {
    let ctx = self.ctx.snapshot();
    let event = self.state.lock().event.clone();
    json!({
      "ctx": ctx,
      "data": msg.payload,
      "labels": msg.labels,
      "event": event,
    })
  }

  /// Merges a delta into `ctx` and queues what survives `no_export` for the parent.
  pub(crate) fn merge_context(&self, delta: &Ctx) {
    if delta.is_empty() {
      return;
    }
    self.ctx.merge(delta);
    let no_export = self.bound.get().map(|b| b.no_export.as_slice()).unwrap_or_default();
    let exported = strip_no_export(delta, no_export);
    if !exported.is_empty() {
      self.state.lock().exported.push(exported);
    }
  }

  /// Converts an engine error into an `error` completion. This is the only place an
  /// `Err` turns into a status.
  pub(crate) fn fail(self: &Arc<Self>, err: WorkflowError, msg: &Message) {
    event!(Level::ERROR, session = %self.log_id(), error = %err, "Session failed.");
    let reply = Message::reply(Status::Error, Some(&err.to_string()), msg.payload.clone());
    {
      let mut st = self.state.lock();
      st.current_hook = None;
      st.hook_child = None;
      st.saved_msg = None;
      st.in_else_branch = false;
    }
    if let Err(complete_err) = self.complete(reply.clone()) {
      event!(Level::ERROR, session = %self.log_id(), error = %complete_err, "Completion failed, finishing without hooks.");
      self.finish(reply);
    }
  }
}
