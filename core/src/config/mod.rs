// switchyard/src/config/mod.rs

//! The read-only catalog the engine consumes: workflows, systems (with their
//! functions and data) and named contexts, plus engine options.
//!
//! Loading and merging definitions from repositories happens elsewhere; this module
//! only deserializes an already-assembled catalog and answers lookups.

pub mod export;

use crate::core::message::Status;
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::definition::{Function, Workflow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use export::ResolvedFunction;

/// Section of a named context that applies to every workflow.
pub const GLOBAL_SECTION: &str = "*";
/// Section of the `_default` context that applies to root (event triggered) sessions only.
pub const EVENTS_SECTION: &str = "_events";
/// Context merged into every session.
pub const DEFAULT_CONTEXT: &str = "_default";

const MAX_FUNCTION_DEPTH: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct System {
  pub description: String,
  pub data: Value,
  pub functions: HashMap<String, Function>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
  /// Upper bound on concurrently live (registered) sessions.
  pub max_sessions: usize,
  /// Status reported when a `wait` times out and the context has no `timeout_status`.
  pub default_timeout_status: Status,
}

impl Default for EngineOptions {
  fn default() -> Self {
    EngineOptions {
      max_sessions: 65536,
      default_timeout_status: Status::Success,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub workflows: HashMap<String, Workflow>,
  pub systems: HashMap<String, System>,
  /// context name → section (`*`, `_events` or a workflow name) → values
  pub contexts: HashMap<String, HashMap<String, Value>>,
  pub options: EngineOptions,
}

impl Config {
  pub fn from_yaml_str(source: &str) -> WorkflowResult<Self> {
    serde_yaml::from_str(source).map_err(|e| WorkflowError::InvalidDefinition {
      workflow: String::from("<config>"),
      message: e.to_string(),
    })
  }

  pub fn from_json(value: Value) -> WorkflowResult<Self> {
    serde_json::from_value(value).map_err(|e| WorkflowError::InvalidDefinition {
      workflow: String::from("<config>"),
      message: e.to_string(),
    })
  }

  /// Looks up a workflow by catalog name. An unnamed definition takes the catalog key.
  pub fn workflow(&self, name: &str) -> WorkflowResult<Workflow> {
    let mut wf = self
      .workflows
      .get(name)
      .cloned()
      .ok_or_else(|| WorkflowError::WorkflowNotFound { name: name.to_string() })?;
    if wf.name.is_empty() {
      wf.name = name.to_string();
    }
    Ok(wf)
  }

  pub fn has_context(&self, name: &str) -> bool {
    self.contexts.contains_key(name)
  }

  pub fn context_section(&self, context: &str, section: &str) -> Option<&Value> {
    self.contexts.get(context).and_then(|sections| sections.get(section))
  }

  /// Follows system function references down to a driver action, collecting the
  /// chain of definitions (caller first), the targeted system's data and the merged
  /// parameters (callers override the functions they reference).
  pub fn resolve_function(&self, function: &Function) -> WorkflowResult<ResolvedFunction> {
    let mut chain = vec![function.clone()];
    let mut sys_data = Value::Null;
    let mut current = function.clone();

    while let Some(target) = current.target.clone() {
      if chain.len() > MAX_FUNCTION_DEPTH {
        return Err(WorkflowError::InvalidDefinition {
          workflow: format!("{}.{}", target.system, target.function),
          message: String::from("function references nest too deeply (cycle?)"),
        });
      }
      let system = self
        .systems
        .get(&target.system)
        .ok_or_else(|| WorkflowError::SystemNotFound { name: target.system.clone() })?;
      let next = system
        .functions
        .get(&target.function)
        .cloned()
        .ok_or_else(|| WorkflowError::FunctionNotFound {
          system: target.system.clone(),
          function: target.function.clone(),
        })?;
      if sys_data.is_null() {
        sys_data = system.data.clone();
      }
      chain.push(next.clone());
      current = next;
    }

    let driver = chain.iter().rev().find_map(|f| f.driver.clone());
    let raw_action = chain.iter().rev().find_map(|f| f.raw_action.clone());
    let (driver, raw_action) = match (driver, raw_action) {
      (Some(d), Some(a)) => (d, a),
      _ => {
        return Err(WorkflowError::InvalidDefinition {
          workflow: function.description.clone(),
          message: String::from("function does not resolve to a driver action"),
        })
      }
    };

    let mut params = serde_json::Map::new();
    for f in chain.iter().rev() {
      if let Some(Value::Object(p)) = &f.parameters {
        crate::core::merge::merge_override(&mut params, p);
      }
    }

    Ok(ResolvedFunction {
      driver,
      raw_action,
      parameters: Value::Object(params),
      sys_data,
      chain,
    })
  }
}
