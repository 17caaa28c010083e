// tests/session_flow_tests.rs
mod common; // Reference the common module

use common::*;
use serde_json::json;
use serial_test::serial;
use std::collections::HashSet;
use switchyard::Status;

const CATALOG: &str = r#"
workflows:
  each:
    iterate: ["item1", "item2", "item3"]
    call_driver: worker.process

  each_as:
    iterate: "$event.hosts"
    iterate_as: host
    call_driver: worker.ping

  fan_out:
    iterate_parallel: [1, 2, 3]
    iterate_pool: 2
    call_driver: worker.process

  fan_out_failing:
    iterate_parallel: [a, b]
    call_driver: worker.process
    with:
      _output: fan

  nothing:
    iterate: []
    call_driver: worker.never

  crew:
    threads:
      - call_driver: crew.one
        export:
          one: "$data.value"
      - call_driver: crew.two
        export:
          two: "$data.value"
      - call_driver: crew.three

  strict:
    with:
      _output: strict
    steps:
      - call_driver: step.first
      - call_driver: step.second

  lenient:
    on_error: continue
    steps:
      - call_driver: step.first
      - call_driver: step.second

  picky:
    on_failure: exit
    with:
      _output: picky
    steps:
      - call_driver: step.first
      - call_driver: step.second

  router:
    with:
      env: prod
    switch: "$ctx.env"
    cases:
      prod:
        call_driver: deploy.prod
      dev:
        call_driver: deploy.dev
    default:
      call_driver: deploy.none

  poll:
    until: ["{{ ctx.ready }}"]
    call_function: probe.check

  guarded:
    with:
      enabled: "false"
    if: ["{{ ctx.enabled }}"]
    call_driver: worker.main
    else:
      call_driver: worker.fallback

  skipped:
    unless: ["yes"]
    call_driver: worker.main

systems:
  probe:
    functions:
      check:
        driver: probe
        rawAction: check
        export:
          ready: "$data.ready"
"#;

#[tokio::test]
#[serial]
async fn serial_iteration_dispatches_one_item_at_a_time() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("each", json!({}));

  for item in ["item1", "item2", "item3"] {
    let command = h.next_command().await;
    assert_eq!(target(&command), "worker.process");
    assert_eq!(command.payload["ctx"]["current"], json!(item));
    h.assert_no_command().await;
    assert!(!session.is_finished());
    h.reply(&command, Status::Success, json!({}));
  }

  settle().await;
  assert!(session.is_finished());
  assert!(session.watch().is_cancelled());
  assert!(h.store.is_empty());
}

#[tokio::test]
#[serial]
async fn serial_iteration_exposes_alias_and_iterates_event_data() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("each_as", json!({"hosts": ["web1", "web2"]}));

  let first = h.next_command().await;
  assert_eq!(first.payload["ctx"]["host"], json!("web1"));
  assert_eq!(first.payload["event"]["hosts"], json!(["web1", "web2"]));
  h.reply(&first, Status::Success, json!({}));

  let second = h.next_command().await;
  assert_eq!(second.payload["ctx"]["host"], json!("web2"));
  assert_eq!(second.payload["ctx"]["current"], json!("web2"));
  h.reply(&second, Status::Success, json!({}));

  settle().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn parallel_pool_admits_one_item_per_completion() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("fan_out", json!({}));

  let first = h.next_command().await;
  let second = h.next_command().await;
  h.assert_no_command().await;

  h.reply(&first, Status::Success, json!({}));
  let third = h.next_command().await;
  h.assert_no_command().await;

  let seen: HashSet<String> = [&first, &second, &third]
    .iter()
    .map(|c| c.payload["ctx"]["current"].to_string())
    .collect();
  assert_eq!(seen, HashSet::from(["1".to_string(), "2".to_string(), "3".to_string()]));

  h.reply(&third, Status::Success, json!({}));
  settle().await;
  assert!(!session.is_finished());
  h.reply(&second, Status::Success, json!({}));
  settle().await;
  assert!(session.is_finished());
  assert!(h.store.is_empty());
}

#[tokio::test]
#[serial]
async fn parallel_errors_do_not_stop_siblings_and_decide_the_status() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("fan_out_failing", json!({}));

  let first = h.next_command().await;
  let second = h.next_command().await;

  h.reply_with_reason(&first, Status::Error, "driver crashed");
  settle().await;
  assert!(!session.is_finished());

  h.reply(&second, Status::Success, json!({}));
  let result = h.next_result().await;
  assert_eq!(result.status, Status::Error);
  assert_eq!(result.reason.as_deref(), Some("driver crashed"));
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn empty_iteration_completes_without_dispatching() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("nothing", json!({}));
  h.assert_no_command().await;
  assert!(session.is_finished());
  assert!(h.store.is_empty());
}

#[tokio::test]
#[serial]
async fn threads_dispatch_together_and_complete_after_all_report() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("crew", json!({}));

  let mut commands = Vec::new();
  for _ in 0..3 {
    commands.push(h.next_command().await);
  }
  h.assert_no_command().await;

  let targets: HashSet<String> = commands.iter().map(target).collect();
  assert_eq!(
    targets,
    HashSet::from(["crew.one".to_string(), "crew.two".to_string(), "crew.three".to_string()])
  );
  let numbers: HashSet<String> = commands
    .iter()
    .map(|c| c.payload["ctx"]["thread_number"].to_string())
    .collect();
  assert_eq!(numbers.len(), 3);

  // Reply in reverse dispatch order; only the count matters.
  for (i, command) in commands.iter().rev().enumerate() {
    assert!(!session.is_finished());
    h.reply(command, Status::Success, json!({"value": i}));
    settle().await;
  }

  assert!(session.is_finished());
  let ctx = session.ctx();
  assert!(ctx.get("one").is_some());
  assert!(ctx.get("two").is_some());
}

#[tokio::test]
#[serial]
async fn step_error_exits_by_default() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("strict", json!({}));

  let first = h.next_command().await;
  assert_eq!(target(&first), "step.first");
  assert_eq!(first.payload["ctx"]["step_number"], json!(0));
  h.reply_with_reason(&first, Status::Error, "boom");

  let result = h.next_result().await;
  assert_eq!(result.status, Status::Error);
  assert_eq!(result.output, json!("strict"));
  h.assert_no_command().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn step_error_continues_when_policy_says_so() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("lenient", json!({}));

  let first = h.next_command().await;
  h.reply(&first, Status::Error, json!({}));

  let second = h.next_command().await;
  assert_eq!(target(&second), "step.second");
  assert_eq!(second.payload["ctx"]["step_number"], json!(1));
  h.reply(&second, Status::Success, json!({}));

  settle().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn failure_exits_only_with_exit_policy() {
  setup_tracing();
  let mut h = harness(CATALOG);
  h.start("picky", json!({}));

  let first = h.next_command().await;
  h.reply(&first, Status::Failure, json!({}));

  let result = h.next_result().await;
  assert_eq!(result.status, Status::Failure);
  h.assert_no_command().await;
}

#[tokio::test]
#[serial]
async fn switch_runs_the_matching_case() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("router", json!({}));

  let command = h.next_command().await;
  assert_eq!(target(&command), "deploy.prod");
  h.reply(&command, Status::Success, json!({}));
  settle().await;
  assert!(session.is_finished());
}

#[tokio::test]
#[serial]
async fn loop_repeats_until_condition_holds() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("poll", json!({}));

  let first = h.next_command().await;
  assert_eq!(target(&first), "probe.check");
  h.reply(&first, Status::Success, json!({"ready": false}));

  let second = h.next_command().await;
  assert_eq!(second.payload["ctx"]["ready"], json!(false));
  h.reply(&second, Status::Success, json!({"ready": true}));

  h.assert_no_command().await;
  assert!(session.is_finished());
  assert_eq!(session.ctx().get("ready"), Some(json!(true)));
}

#[tokio::test]
#[serial]
async fn failed_gate_runs_else_branch() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("guarded", json!({}));

  let command = h.next_command().await;
  assert_eq!(target(&command), "worker.fallback");
  assert!(!session.is_finished());
  h.reply(&command, Status::Success, json!({}));
  settle().await;
  assert!(session.is_finished());
  assert!(h.store.is_empty());
}

#[tokio::test]
#[serial]
async fn failed_gate_without_else_is_a_noop() {
  setup_tracing();
  let mut h = harness(CATALOG);
  let session = h.start("skipped", json!({}));
  h.assert_no_command().await;
  assert!(session.is_finished());
}
