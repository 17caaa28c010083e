// switchyard/src/conditional/mod.rs

//! Predicate evaluation for workflows.
//!
//! Gate conditions (`if`, `if_any`, `unless`, `unless_all`, `match`, `unless_match`)
//! are bound once and checked before the first execution. Loop conditions (`while`,
//! `while_any`, `until`, `until_all`, `while_match`, `until_match`) are re-interpolated
//! against fresh environment data every round.

pub mod matcher;
pub mod truthy;

use crate::core::interpolate::interpolate;
use crate::error::WorkflowResult;
use crate::workflow::bound::{GateConditions, LoopConditions};
use serde_json::Value;

pub use matcher::compare;
pub use truthy::{is_truthy, is_truthy_str};

fn all_truthy(list: &[Value]) -> bool {
  list.iter().all(is_truthy)
}

fn any_truthy(list: &[Value]) -> bool {
  list.iter().any(is_truthy)
}

fn as_list(value: Value) -> Vec<Value> {
  match value {
    Value::Array(items) => items,
    single => vec![single],
  }
}

/// Checks bound gate conditions against the session context. Absent conditions pass.
pub fn check_condition(gate: &GateConditions, ctx: &Value) -> bool {
  if let Some(list) = &gate.if_all {
    if !all_truthy(list) {
      return false;
    }
  }
  if let Some(list) = gate.if_any.as_ref().filter(|l| !l.is_empty()) {
    if !any_truthy(list) {
      return false;
    }
  }
  if let Some(list) = &gate.unless {
    if any_truthy(list) {
      return false;
    }
  }
  if let Some(list) = gate.unless_all.as_ref().filter(|l| !l.is_empty()) {
    if all_truthy(list) {
      return false;
    }
  }
  if let Some(criteria) = &gate.match_ {
    if !compare(ctx, criteria) {
      return false;
    }
  }
  if let Some(criteria) = &gate.unless_match {
    if compare(ctx, criteria) {
      return false;
    }
  }
  true
}

/// Interpolates the loop conditions against `env` and checks them. The `*_match`
/// forms compare against `env.ctx`. A workflow without loop conditions passes.
pub fn check_loop_condition(conditions: &LoopConditions, env: &Value) -> WorkflowResult<bool> {
  let bind = |v: &Option<Value>| -> WorkflowResult<Option<Value>> { v.as_ref().map(|v| interpolate(v, env)).transpose() };
  let ctx = env.get("ctx").unwrap_or(&Value::Null);

  if let Some(v) = bind(&conditions.while_all)? {
    if !all_truthy(&as_list(v)) {
      return Ok(false);
    }
  }
  if let Some(v) = bind(&conditions.while_any)? {
    if !any_truthy(&as_list(v)) {
      return Ok(false);
    }
  }
  if let Some(v) = bind(&conditions.until)? {
    if any_truthy(&as_list(v)) {
      return Ok(false);
    }
  }
  if let Some(v) = bind(&conditions.until_all)? {
    let list = as_list(v);
    if !list.is_empty() && all_truthy(&list) {
      return Ok(false);
    }
  }
  if let Some(criteria) = bind(&conditions.while_match)? {
    if !compare(ctx, &criteria) {
      return Ok(false);
    }
  }
  if let Some(criteria) = bind(&conditions.until_match)? {
    if compare(ctx, &criteria) {
      return Ok(false);
    }
  }
  Ok(true)
}
