// switchyard/src/workflow/definition.rs

//! The template phase of a workflow: the raw, declarative definition exactly as it
//! was loaded. It is never mutated; a session binds a copy of it against its own
//! context (see `workflow::bound`).

use crate::core::control::ErrorPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A declarative workflow definition.
///
/// Most fields are `Value`s because they may hold `{{ ... }}` templates or `$path`
/// references that only take their final shape once bound against a context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
  pub name: String,
  pub description: String,

  // Gate conditions, evaluated once before the first execution.
  #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
  pub if_all: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub if_any: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unless: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unless_all: Option<Value>,
  #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
  pub match_: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub unless_match: Option<Value>,

  // Loop conditions, re-evaluated every round.
  #[serde(rename = "while", skip_serializing_if = "Option::is_none")]
  pub while_all: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub while_any: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub until: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub until_all: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub while_match: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub until_match: Option<Value>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub iterate: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iterate_parallel: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iterate_as: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iterate_pool: Option<Value>,

  // Actions, in dispatch priority order.
  #[serde(alias = "workflow", skip_serializing_if = "Option::is_none")]
  pub call_workflow: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub call_driver: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub call_function: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub function: Option<Function>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub steps: Vec<Workflow>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub threads: Vec<Workflow>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub wait: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub switch: Option<Value>,
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  pub cases: BTreeMap<String, Workflow>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub default: Option<Box<Workflow>>,

  /// Runs instead of the action when the gate conditions fail: a workflow
  /// definition, or the name of a workflow in the catalog.
  #[serde(rename = "else", skip_serializing_if = "Option::is_none")]
  pub else_branch: Option<Value>,

  /// Local variables: a map, or a list of maps merged one layer at a time.
  #[serde(alias = "local", skip_serializing_if = "Option::is_none")]
  pub with: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub contexts: Option<Value>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub export: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_success: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_failure: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_error: Option<Value>,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub no_export: Vec<String>,

  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_error: Option<ErrorPolicy>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub on_failure: Option<ErrorPolicy>,

  // Accepted by the schema; the engine does not retry on its own.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub retry: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub backoff: Option<Value>,
}

impl Workflow {
  /// A workflow that only calls another workflow from the catalog.
  pub fn calling(name: impl Into<String>) -> Self {
    Workflow {
      call_workflow: Some(name.into()),
      ..Default::default()
    }
  }

  /// A workflow that only calls a driver action (`driver.action`).
  pub fn calling_driver(target: impl Into<String>) -> Self {
    Workflow {
      call_driver: Some(target.into()),
      ..Default::default()
    }
  }

  /// Parses an ad hoc workflow from arbitrary structured data.
  pub fn from_value(data: Value) -> Result<Self, serde_json::Error> {
    serde_json::from_value(data)
  }

  /// The action-only copy used for one parallel iteration item: the same action, none
  /// of the gate, loop, iteration, context or export machinery of the iterating workflow.
  pub(crate) fn iteration_body(&self) -> Self {
    Workflow {
      name: self.name.clone(),
      description: self.description.clone(),
      call_workflow: self.call_workflow.clone(),
      call_driver: self.call_driver.clone(),
      call_function: self.call_function.clone(),
      function: self.function.clone(),
      steps: self.steps.clone(),
      threads: self.threads.clone(),
      wait: self.wait.clone(),
      switch: self.switch.clone(),
      cases: self.cases.clone(),
      default: self.default.clone(),
      on_error: self.on_error,
      on_failure: self.on_failure,
      ..Default::default()
    }
  }
}

/// A callable function: either a raw driver action, or a reference to a function
/// defined by a system (which may itself reference another system function).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Function {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub driver: Option<String>,
  #[serde(alias = "rawAction", skip_serializing_if = "Option::is_none")]
  pub raw_action: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target: Option<FunctionTarget>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub parameters: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_success: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_failure: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub export_on_error: Option<Value>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTarget {
  pub system: String,
  pub function: String,
}

impl Function {
  pub fn driver_action(driver: impl Into<String>, action: impl Into<String>) -> Self {
    Function {
      driver: Some(driver.into()),
      raw_action: Some(action.into()),
      ..Default::default()
    }
  }

  pub fn system_function(system: impl Into<String>, function: impl Into<String>) -> Self {
    Function {
      target: Some(FunctionTarget {
        system: system.into(),
        function: function.into(),
      }),
      ..Default::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_keywords_and_aliases() {
    let wf = Workflow::from_value(json!({
      "name": "deploy",
      "if": ["{{ ctx.ready }}"],
      "workflow": "notify",
      "local": {"a": 1},
      "on_error": "continue",
    }))
    .unwrap();
    assert_eq!(wf.if_all, Some(json!(["{{ ctx.ready }}"])));
    assert_eq!(wf.call_workflow.as_deref(), Some("notify"));
    assert_eq!(wf.with, Some(json!({"a": 1})));
    assert_eq!(wf.on_error, Some(ErrorPolicy::Continue));
  }

  #[test]
  fn nested_steps_and_cases_parse() {
    let wf = Workflow::from_value(json!({
      "steps": [{"call_driver": "slack.say"}, {"wait": "1s"}],
      "switch": "$ctx.env",
      "cases": {"prod": {"call_workflow": "careful"}},
      "default": {"call_workflow": "yolo"},
    }))
    .unwrap();
    assert_eq!(wf.steps.len(), 2);
    assert_eq!(wf.cases["prod"].call_workflow.as_deref(), Some("careful"));
    assert!(wf.default.is_some());
  }

  #[test]
  fn iteration_body_drops_control_fields() {
    let wf = Workflow {
      iterate_parallel: Some(json!([1, 2])),
      if_all: Some(json!([true])),
      export: Some(json!({"x": 1})),
      call_driver: Some("d.a".into()),
      ..Default::default()
    };
    let body = wf.iteration_body();
    assert!(body.iterate_parallel.is_none());
    assert!(body.if_all.is_none());
    assert!(body.export.is_none());
    assert_eq!(body.call_driver.as_deref(), Some("d.a"));
  }
}
