// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchyard::core::message::{LABEL_EVENT_ID, LABEL_SESSION_ID};
use switchyard::{Config, Ctx, Host, Message, Session, SessionResult, SessionStore, Status};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::Level;

// --- A host that records everything the engine sends ---
pub struct RecordingHost {
  config: Arc<Config>,
  commands: UnboundedSender<Message>,
  results: UnboundedSender<SessionResult>,
}

impl Host for RecordingHost {
  fn send_message(&self, msg: Message) -> anyhow::Result<()> {
    self.commands.send(msg)?;
    Ok(())
  }

  fn config(&self) -> Arc<Config> {
    Arc::clone(&self.config)
  }

  fn emit_result(&self, result: SessionResult) -> anyhow::Result<()> {
    self.results.send(result)?;
    Ok(())
  }
}

pub struct Harness {
  pub config: Arc<Config>,
  pub store: SessionStore,
  pub commands: UnboundedReceiver<Message>,
  pub results: UnboundedReceiver<SessionResult>,
}

pub fn harness(catalog: &str) -> Harness {
  let config = Config::from_yaml_str(catalog).expect("test catalog should parse");
  harness_with(config)
}

pub fn harness_with(config: Config) -> Harness {
  let config = Arc::new(config);
  let (commands_tx, commands) = unbounded_channel();
  let (results_tx, results) = unbounded_channel();
  let host = RecordingHost {
    config: Arc::clone(&config),
    commands: commands_tx,
    results: results_tx,
  };
  Harness {
    config,
    store: SessionStore::new(Arc::new(host)),
    commands,
    results,
  }
}

impl Harness {
  /// Starts a catalog workflow for a trigger event with the given `data`.
  pub fn start(&self, workflow: &str, data: Value) -> Arc<Session> {
    self.start_with(workflow, data, Ctx::new())
  }

  pub fn start_with(&self, workflow: &str, data: Value, ctx: Ctx) -> Arc<Session> {
    let wf = self.config.workflow(workflow).expect("workflow should exist in the test catalog");
    self.store.start_session(wf, trigger(data), ctx)
  }

  /// The next command the engine sent. Fails the test after five seconds.
  pub async fn next_command(&mut self) -> Message {
    tokio::time::timeout(Duration::from_secs(5), self.commands.recv())
      .await
      .expect("timed out waiting for a command")
      .expect("command channel closed")
  }

  pub async fn next_result(&mut self) -> SessionResult {
    tokio::time::timeout(Duration::from_secs(5), self.results.recv())
      .await
      .expect("timed out waiting for a result")
      .expect("result channel closed")
  }

  /// Lets spawned tasks run, then asserts nothing else was sent.
  pub async fn assert_no_command(&mut self) {
    settle().await;
    if let Ok(msg) = self.commands.try_recv() {
      panic!("unexpected command: {msg:?}");
    }
  }

  /// Answers a command the way a driver would.
  pub fn reply(&self, command: &Message, status: Status, payload: Value) {
    let session_id = command.session_id().expect("command should carry a session ID");
    let reply = Message::reply(status, None, payload).with_label(LABEL_SESSION_ID, session_id);
    assert!(self.store.handle_return(reply));
  }

  pub fn reply_with_reason(&self, command: &Message, status: Status, reason: &str) {
    let session_id = command.session_id().expect("command should carry a session ID");
    let reply = Message::reply(status, Some(reason), Value::Null).with_label(LABEL_SESSION_ID, session_id);
    assert!(self.store.handle_return(reply));
  }
}

/// A trigger event as a host would deliver it.
pub fn trigger(data: Value) -> Message {
  Message::new("eventbus", "message")
    .with_label(LABEL_EVENT_ID, "evt-1")
    .with_payload(json!({ "data": data }))
}

/// The `driver.rawAction` a command invokes.
pub fn target(command: &Message) -> String {
  format!(
    "{}.{}",
    command.payload["function"]["driver"].as_str().unwrap_or_default(),
    command.payload["function"]["rawAction"].as_str().unwrap_or_default()
  )
}

/// Yields enough times for spawned tasks to run to their next suspension point.
pub async fn settle() {
  for _ in 0..20 {
    tokio::task::yield_now().await;
  }
}

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}
