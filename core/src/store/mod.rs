// switchyard/src/store/mod.rs

//! The session store: the registry every reply is routed through, the map of
//! suspended sessions, and the public entry points a host service calls.
//!
//! There is no scheduler loop. A session advances only when a message arrives and is
//! looked up here by ID. Spawned branches (root starts, threads, parallel items,
//! hooks, timeout timers) are tracked so `drain` can wait for them.

mod slots;

pub use slots::SessionId;

use crate::config::Config;
use crate::core::context_data::Ctx;
use crate::core::message::{Message, Status};
use crate::error::{WorkflowError, WorkflowResult};
use crate::session::{Session, SessionSummary};
use crate::workflow::Workflow;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use slots::SlotTable;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{event, instrument, Level};

/// The services the engine needs from its host: the message bus, the catalog and
/// result reporting.
pub trait Host: Send + Sync + 'static {
  /// Publishes a message (a driver command) on the bus.
  fn send_message(&self, msg: Message) -> anyhow::Result<()>;

  /// The current catalog. Read once per lookup, so a host may swap it between sessions.
  fn config(&self) -> Arc<Config>;

  /// Receives the final disposition of root sessions that declare `_output`.
  fn emit_result(&self, result: SessionResult) -> anyhow::Result<()> {
    let _ = result;
    Ok(())
  }
}

/// Final disposition of a root session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
  pub event_id: String,
  pub workflow: String,
  pub status: Status,
  pub reason: Option<String>,
  pub output: Value,
}

/// Live sessions of one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
  pub event_id: String,
  pub workflow: String,
  pub description: String,
  pub sessions: usize,
  pub age_ms: u128,
}

struct Suspension {
  session: SessionId,
  serial: u64,
  timer: CancellationToken,
}

struct StoreInner {
  host: Arc<dyn Host>,
  sessions: Mutex<SlotTable<Arc<Session>>>,
  suspended: Mutex<HashMap<String, Suspension>>,
  tracker: TaskTracker,
  serial: AtomicU64,
}

/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionStore {
  inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SessionStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionStore")
      .field("live_sessions", &self.len())
      .field("suspended", &self.inner.suspended.lock().len())
      .finish()
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    String::from("unknown panic")
  }
}

impl SessionStore {
  pub fn new(host: Arc<dyn Host>) -> Self {
    let capacity = host.config().options.max_sessions;
    event!(Level::DEBUG, capacity, "Session store created.");
    SessionStore {
      inner: Arc::new(StoreInner {
        host,
        sessions: Mutex::new(SlotTable::with_capacity(capacity)),
        suspended: Mutex::new(HashMap::new()),
        tracker: TaskTracker::new(),
        serial: AtomicU64::new(1),
      }),
    }
  }

  /// Starts a root session for a triggering event. `ctx` seeds the session context.
  ///
  /// The returned handle can be watched for completion. Preparation and
  /// configuration errors complete the session with an `error` status.
  #[instrument(name = "SessionStore::start_session", skip_all, fields(workflow = %wf.name))]
  pub fn start_session(&self, wf: Workflow, msg: Message, ctx: Ctx) -> Arc<Session> {
    let event_id = match msg.event_id().filter(|id| !id.is_empty()) {
      Some(id) => id.to_string(),
      None => format!("event-{}", self.inner.serial.fetch_add(1, Ordering::Relaxed)),
    };
    let session = Session::new(self.clone(), event_id, None, wf, false);
    if let Err(err) = session.prepare(&msg, None, ctx).and_then(|_| session.execute(msg.clone())) {
      session.fail(err, &msg);
    }
    session
  }

  /// Parses an ad hoc workflow definition and starts it. A definition that does not
  /// parse is reported through `Host::emit_result` with status `error`.
  #[instrument(name = "SessionStore::start_dynamic_session", skip_all)]
  pub fn start_dynamic_session(&self, data: Value, msg: Message, ctx: Ctx) -> Option<Arc<Session>> {
    match Workflow::from_value(data) {
      Ok(wf) => Some(self.start_session(wf, msg, ctx)),
      Err(err) => {
        event!(Level::ERROR, error = %err, "Dynamic workflow definition rejected.");
        self.emit_result(SessionResult {
          event_id: msg.event_id().unwrap_or_default().to_string(),
          workflow: String::from("<dynamic>"),
          status: Status::Error,
          reason: Some(WorkflowError::from(err).to_string()),
          output: Value::Null,
        });
        None
      }
    }
  }

  /// Delivers a reply (and any child exports) to a session by its wire ID.
  #[instrument(name = "SessionStore::continue_session", skip_all, fields(session = %session_id, status = %msg.status()))]
  pub fn continue_session(&self, session_id: &str, msg: Message, exports: Vec<Ctx>) {
    match session_id.parse::<SessionId>() {
      Ok(id) => self.continue_by_id(id, msg, exports, None),
      Err(err) => event!(Level::WARN, error = %err, "Reply with a malformed session ID dropped."),
    }
  }

  /// Routes a driver reply using its `sessionID` label. Returns `false` when the
  /// message carries no session ID.
  pub fn handle_return(&self, msg: Message) -> bool {
    match msg.session_id().map(str::to_string) {
      Some(id) => {
        self.continue_session(&id, msg, Vec::new());
        true
      }
      None => {
        event!(Level::WARN, "Return message without a session ID dropped.");
        false
      }
    }
  }

  /// Resumes the session suspended under `key`. The continuation runs on its own
  /// task. Returns `false` when nothing waits under that key.
  #[instrument(name = "SessionStore::resume_session", skip_all, fields(token = %key))]
  pub fn resume_session(&self, key: &str, msg: Message) -> bool {
    let Some(suspension) = self.inner.suspended.lock().remove(key) else {
      event!(Level::WARN, "No session waits under this token.");
      return false;
    };
    suspension.timer.cancel();
    self.resume(suspension.session, msg);
    true
  }

  fn resume(&self, id: SessionId, msg: Message) {
    let msg = decode_resume_labels(msg);
    event!(Level::INFO, session = %id, status = %msg.status(), "Resuming session.");
    let store = self.clone();
    self.inner.tracker.spawn(async move {
      store.continue_by_id(id, msg, Vec::new(), None);
    });
  }

  /// Summaries of the live sessions of one event, in ID order.
  pub fn by_event_id(&self, event_id: &str) -> Vec<SessionSummary> {
    let sessions: Vec<Arc<Session>> = self
      .inner
      .sessions
      .lock()
      .values()
      .filter(|s| s.event_id() == event_id)
      .cloned()
      .collect();
    let mut summaries: Vec<SessionSummary> = sessions.iter().map(|s| s.summary()).collect();
    summaries.sort_by_key(|s| s.id.clone());
    summaries
  }

  /// Live sessions grouped by event, with the root workflow's name and description.
  pub fn get_events(&self) -> Vec<EventSummary> {
    let sessions: Vec<Arc<Session>> = self.inner.sessions.lock().values().cloned().collect();
    let mut events: BTreeMap<String, EventSummary> = BTreeMap::new();
    for session in sessions {
      let summary = session.summary();
      let entry = events.entry(summary.event_id.clone()).or_insert_with(|| EventSummary {
        event_id: summary.event_id.clone(),
        workflow: String::new(),
        description: String::new(),
        sessions: 0,
        age_ms: 0,
      });
      entry.sessions += 1;
      entry.age_ms = entry.age_ms.max(session.age_ms());
      if session.parent().is_none() {
        entry.workflow = summary.workflow;
        entry.description = summary.description;
      }
    }
    events.into_values().collect()
  }

  /// Reports a final result to the host. Host failures are logged.
  pub fn emit_result(&self, result: SessionResult) {
    event!(Level::DEBUG, event_id = %result.event_id, status = %result.status, "Emitting session result.");
    if let Err(err) = self.inner.host.emit_result(result) {
      event!(Level::ERROR, error = %err, "Host failed to accept a session result.");
    }
  }

  /// Waits until every spawned branch (including pending timeouts) has finished.
  pub async fn drain(&self) {
    self.inner.tracker.close();
    self.inner.tracker.wait().await;
    self.inner.tracker.reopen();
  }

  /// Number of registered sessions.
  pub fn len(&self) -> usize {
    self.inner.sessions.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_suspended(&self, token: &str) -> bool {
    self.inner.suspended.lock().contains_key(token)
  }

  pub(crate) fn config(&self) -> Arc<Config> {
    self.inner.host.config()
  }

  pub(crate) fn send(&self, msg: Message) -> WorkflowResult<()> {
    self.inner.host.send_message(msg)?;
    Ok(())
  }

  pub(crate) fn register(&self, session: Arc<Session>) -> WorkflowResult<SessionId> {
    let id = self.inner.sessions.lock().insert(session)?;
    event!(Level::TRACE, session = %id, "Session registered.");
    Ok(id)
  }

  /// Removes a session and releases any wait it still holds.
  pub(crate) fn deregister(&self, id: SessionId) {
    let removed = self.inner.sessions.lock().remove(id);
    if removed.is_none() {
      event!(Level::WARN, session = %id, "Session was already deregistered.");
      return;
    }
    self.inner.suspended.lock().retain(|_, suspension| {
      if suspension.session == id {
        suspension.timer.cancel();
        false
      } else {
        true
      }
    });
  }

  fn lookup(&self, id: SessionId) -> Option<Arc<Session>> {
    self.inner.sessions.lock().get(id).cloned()
  }

  /// Delivers a reply to a live session. `reporter` is the finished child the reply
  /// comes from, if any. Engine errors complete that session with an `error` status.
  pub(crate) fn continue_by_id(&self, id: SessionId, msg: Message, exports: Vec<Ctx>, reporter: Option<&Session>) {
    let Some(session) = self.lookup(id) else {
      event!(Level::WARN, session = %id, "Reply for an unknown session dropped.");
      return;
    };
    if let Err(err) = session.continue_exec(msg.clone(), exports, reporter) {
      session.fail(err, &msg);
    }
  }

  /// Registers `token` for a waiting session. Returns the suspension serial that a
  /// timeout must present to resume it.
  pub(crate) fn suspend(&self, token: &str, id: SessionId) -> WorkflowResult<u64> {
    let mut suspended = self.inner.suspended.lock();
    if suspended.contains_key(token) {
      return Err(WorkflowError::ResumeTokenCollision {
        token: token.to_string(),
      });
    }
    let serial = self.inner.serial.fetch_add(1, Ordering::Relaxed);
    suspended.insert(
      token.to_string(),
      Suspension {
        session: id,
        serial,
        timer: CancellationToken::new(),
      },
    );
    event!(Level::DEBUG, session = %id, %token, "Session suspended.");
    Ok(serial)
  }

  /// Resumes the suspension `serial` under `token` with `msg` after `timeout`, unless
  /// it is resumed or released first.
  pub(crate) fn arm_timeout(&self, token: String, serial: u64, timeout: Duration, msg: Message) {
    let Some(timer) = self
      .inner
      .suspended
      .lock()
      .get(&token)
      .filter(|s| s.serial == serial)
      .map(|s| s.timer.clone())
    else {
      return;
    };
    let store = self.clone();
    self.inner.tracker.spawn(async move {
      if tokio::time::timeout(timeout, timer.cancelled()).await.is_ok() {
        return;
      }
      let expired = {
        let mut suspended = store.inner.suspended.lock();
        let current = suspended.get(&token).map_or(false, |s| s.serial == serial);
        if current {
          suspended.remove(&token)
        } else {
          None
        }
      };
      if let Some(suspension) = expired {
        event!(Level::INFO, %token, "Wait timed out.");
        store.resume(suspension.session, msg);
      }
    });
  }

  /// Runs `work` on a tracked task. An `Err` or a panic completes `session` with an
  /// `error` status; the panic is then resumed.
  pub(crate) fn spawn_guarded<F>(&self, session: Arc<Session>, msg: Message, work: F)
  where
    F: FnOnce() -> WorkflowResult<()> + Send + 'static,
  {
    self.inner.tracker.spawn(async move {
      match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => session.fail(err, &msg),
        Err(payload) => {
          let reason = panic_message(payload.as_ref());
          session.fail(WorkflowError::Internal(format!("panic: {reason}")), &msg);
          panic::resume_unwind(payload);
        }
      }
    });
  }
}

/// A resume event may carry its status and reason as `payload.labels`.
fn decode_resume_labels(mut msg: Message) -> Message {
  if let Some(Value::Object(labels)) = msg.payload.get("labels") {
    let decoded: Vec<(String, String)> = labels
      .iter()
      .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
      .collect();
    for (key, value) in decoded {
      msg.labels.entry(key).or_insert(value);
    }
  }
  msg
}
