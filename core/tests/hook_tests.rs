// tests/hook_tests.rs
mod common;

use common::*;
use serde_json::json;
use serial_test::serial;
use switchyard::Status;

const CATALOG: &str = r#"
workflows:
  audited:
    with:
      _output: audited
      hooks:
        on_first_action: audit
    call_driver: worker.main

  announced:
    with:
      hooks:
        on_session: audit
        on_success: notify
        on_exit: cleanup
    call_driver: worker.main

  rounds:
    with:
      hooks:
        on_item: audit
    iterate: [a, b]
    call_driver: worker.main

  recovering:
    with:
      _output: recovering
      hooks:
        on_error: notify
    call_driver: worker.main

  waiter:
    with:
      resume_token: waiter-1
      hooks:
        on_action: audit
    wait: infinite

  guarded_crew:
    with:
      _output: guarded_crew
      hooks:
        on_error: notify
    threads:
      - call_driver: crew.one
      - call_driver: crew.two
        export:
          two: "$data.value"

  audit:
    call_driver: audit.log

  notify:
    call_driver: chat.say

  cleanup:
    call_driver: infra.cleanup
"#;

#[tokio::test]
#[serial]
async fn hook_runs_before_the_stage_it_guards() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("audited", json!({}));

  let audit = h.next_command().await;
  assert_eq!(target(&audit), "audit.log");
  assert!(audit.payload["ctx"].get("hooks").is_none());
  h.assert_no_command().await;
  h.reply(&audit, Status::Success, json!({}));

  let main = h.next_command().await;
  assert_eq!(target(&main), "worker.main");
  h.reply(&main, Status::Success, json!({}));

  let result = h.next_result().await;
  assert_eq!(result.status, Status::Success);
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn failing_hook_aborts_with_error() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("audited", json!({}));

  let audit = h.next_command().await;
  h.reply_with_reason(&audit, Status::Failure, "audit store offline");

  let result = h.next_result().await;
  assert_eq!(result.status, Status::Error);
  let reason = result.reason.unwrap_or_default();
  assert!(reason.starts_with("hook on_first_action failed"), "{reason}");
  assert!(reason.contains("audit store offline"), "{reason}");
  h.assert_no_command().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn session_and_completion_hooks_run_in_order() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("announced", json!({}));

  let expected = ["audit.log", "worker.main", "chat.say", "infra.cleanup"];
  for step in expected {
    let command = h.next_command().await;
    assert_eq!(target(&command), step);
    h.assert_no_command().await;
    assert!(!session.is_finished());
    h.reply(&command, Status::Success, json!({}));
  }

  settle().await;
  assert!(session.is_finished());
  assert!(h.store.is_empty());
}

#[tokio::test]
#[serial]
async fn item_hook_fires_for_every_item() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("rounds", json!({}));

  for item in ["a", "b"] {
    let audit = h.next_command().await;
    assert_eq!(target(&audit), "audit.log");
    assert_eq!(audit.payload["ctx"]["current"], json!(item));
    h.reply(&audit, Status::Success, json!({}));

    let main = h.next_command().await;
    assert_eq!(target(&main), "worker.main");
    h.reply(&main, Status::Success, json!({}));
  }

  settle().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn error_hook_runs_and_keeps_the_error_status() {
  setup_tracing();
  let mut h = harness(CATALOG);
  h.start("recovering", json!({}));

  let main = h.next_command().await;
  h.reply_with_reason(&main, Status::Error, "exploded");

  let notify = h.next_command().await;
  assert_eq!(target(&notify), "chat.say");
  h.reply(&notify, Status::Success, json!({}));

  let result = h.next_result().await;
  assert_eq!(result.status, Status::Error);
  assert_eq!(result.reason.as_deref(), Some("exploded"));
}

#[tokio::test]
#[serial]
async fn action_hook_runs_before_a_wait() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("waiter", json!({}));

  let audit = h.next_command().await;
  assert_eq!(target(&audit), "audit.log");
  settle().await;
  assert!(!h.store.is_suspended("waiter-1"));

  h.reply(&audit, Status::Success, json!({}));
  settle().await;
  assert!(h.store.is_suspended("waiter-1"));
  assert!(!session.is_finished());
  h.assert_no_command().await;
}

#[tokio::test]
#[serial]
async fn sibling_replies_do_not_end_a_running_hook() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("guarded_crew", json!({}));

  let first = h.next_command().await;
  let second = h.next_command().await;
  let (one, two) = if target(&first) == "crew.one" {
    (first, second)
  } else {
    (second, first)
  };
  assert_eq!(target(&two), "crew.two");

  h.reply_with_reason(&one, Status::Error, "broke");
  let notify = h.next_command().await;
  assert_eq!(target(&notify), "chat.say");

  // The other thread reports while the error hook is still out.
  h.reply(&two, Status::Success, json!({"value": 2}));
  settle().await;
  assert!(!session.is_finished());
  assert!(h.results.try_recv().is_err());
  assert_eq!(session.ctx().get("two"), Some(json!(2)));

  h.reply(&notify, Status::Success, json!({}));
  let result = h.next_result().await;
  assert_eq!(result.status, Status::Error);
  assert_eq!(result.reason.as_deref(), Some("broke"));
  assert!(session.is_finished());
  h.assert_no_command().await;
}
