// switchyard/src/workflow/bound.rs

//! The bound phase of a workflow.
//!
//! Binding interpolates the fields that are static for the life of a session (gate
//! conditions, iteration list, call targets, wait duration) once, against the session
//! context after preparation. Fields that must see fresher data stay as raw templates
//! in `Deferred`: loop predicates (re-evaluated each round), the else branch, switch
//! cases and export maps (only meaningful when they are reached), and function
//! parameters (evaluated at dispatch, so a serial iteration sees its current item).

use crate::core::control::ErrorPolicy;
use crate::core::interpolate::{interpolate, interpolate_to_string};
use crate::core::message::Status;
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::definition::{Function, FunctionTarget, Workflow};
use crate::workflow::duration::parse_duration;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Gate conditions, already interpolated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateConditions {
  pub if_all: Option<Vec<Value>>,
  pub if_any: Option<Vec<Value>>,
  pub unless: Option<Vec<Value>>,
  pub unless_all: Option<Vec<Value>>,
  pub match_: Option<Value>,
  pub unless_match: Option<Value>,
}

/// Loop conditions, kept as raw templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopConditions {
  pub while_all: Option<Value>,
  pub while_any: Option<Value>,
  pub until: Option<Value>,
  pub until_all: Option<Value>,
  pub while_match: Option<Value>,
  pub until_match: Option<Value>,
}

impl LoopConditions {
  pub fn is_loop(&self) -> bool {
    self.while_all.is_some()
      || self.while_any.is_some()
      || self.until.is_some()
      || self.until_all.is_some()
      || self.while_match.is_some()
      || self.until_match.is_some()
  }
}

/// The items to iterate over, normalised once at bind time: a list iterates its
/// elements, a map iterates `{key, value}` entries, `null` iterates nothing and any
/// other scalar is a single item.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
  pub items: Vec<Value>,
  pub parallel: bool,
  pub alias: Option<String>,
  /// Maximum number of parallel children in flight; `None` means all at once.
  pub pool: Option<usize>,
}

impl Iteration {
  fn items_from(value: Value) -> Vec<Value> {
    match value {
      Value::Array(items) => items,
      Value::Null => Vec::new(),
      Value::Object(map) => map
        .into_iter()
        .map(|(key, value)| serde_json::json!({"key": key, "value": value}))
        .collect(),
      scalar => vec![scalar],
    }
  }

  /// How many parallel children start immediately.
  pub fn initial_admissions(&self) -> usize {
    match self.pool {
      Some(pool) if pool < self.items.len() => pool,
      _ => self.items.len(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSpec {
  Infinite,
  For(Duration),
}

impl WaitSpec {
  pub fn parse(value: &str) -> WorkflowResult<Self> {
    match value.trim() {
      "infinite" => Ok(WaitSpec::Infinite),
      other => parse_duration(other).map(WaitSpec::For),
    }
  }
}

/// The single action a workflow dispatches, chosen in priority order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
  /// Nothing to dispatch; the session routes straight on.
  None,
  Workflow(String),
  Function(Function),
  Steps(Vec<Workflow>),
  Threads(Vec<Workflow>),
  Wait(WaitSpec),
  Switch {
    on: Value,
    cases: BTreeMap<String, Workflow>,
    default: Option<Box<Workflow>>,
  },
}

impl Action {
  /// Every action except `None` fires the action hooks, waits included.
  pub fn is_dispatching(&self) -> bool {
    !matches!(self, Action::None)
  }
}

/// Export maps, kept as raw templates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportSpec {
  pub export: Option<Value>,
  pub on_success: Option<Value>,
  pub on_failure: Option<Value>,
  pub on_error: Option<Value>,
}

impl ExportSpec {
  /// The export maps that apply for a status: the unconditional `export` first, then
  /// the status specific one.
  pub fn select(&self, status: Status) -> impl Iterator<Item = &Value> {
    let specific = match status {
      Status::Success => self.on_success.as_ref(),
      Status::Failure => self.on_failure.as_ref(),
      Status::Error => self.on_error.as_ref(),
    };
    self.export.as_ref().into_iter().chain(specific)
  }
}

/// Fields that are interpolated only when they are reached.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Deferred {
  pub loop_conditions: LoopConditions,
  pub else_branch: Option<Value>,
  pub exports: ExportSpec,
}

/// A workflow bound to a session.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundWorkflow {
  pub name: String,
  pub description: String,
  pub gate: GateConditions,
  pub iteration: Option<Iteration>,
  pub action: Action,
  pub no_export: Vec<String>,
  pub on_error: Option<ErrorPolicy>,
  pub on_failure: Option<ErrorPolicy>,
  pub deferred: Deferred,
  /// The template this was bound from; parallel iteration children are built from it.
  pub template: Workflow,
}

impl BoundWorkflow {
  pub fn is_loop(&self) -> bool {
    self.deferred.loop_conditions.is_loop()
  }

  pub fn is_parallel_iteration(&self) -> bool {
    self.iteration.as_ref().map_or(false, |it| it.parallel)
  }

  pub fn error_policy(&self) -> ErrorPolicy {
    self.on_error.unwrap_or(ErrorPolicy::Exit)
  }

  pub fn failure_policy(&self) -> ErrorPolicy {
    self.on_failure.unwrap_or(ErrorPolicy::Continue)
  }
}

fn bind_list(value: &Option<Value>, env: &Value) -> WorkflowResult<Option<Vec<Value>>> {
  value
    .as_ref()
    .map(|v| {
      Ok(match interpolate(v, env)? {
        Value::Array(items) => items,
        single => vec![single],
      })
    })
    .transpose()
}

fn bind_value(value: &Option<Value>, env: &Value) -> WorkflowResult<Option<Value>> {
  value.as_ref().map(|v| interpolate(v, env)).transpose()
}

fn split_target<'a>(workflow: &str, field: &str, target: &'a str) -> WorkflowResult<(&'a str, &'a str)> {
  target
    .split_once('.')
    .filter(|(left, right)| !left.is_empty() && !right.is_empty())
    .ok_or_else(|| WorkflowError::InvalidDefinition {
      workflow: workflow.to_string(),
      message: format!("{field} expects 'a.b', got '{target}'"),
    })
}

impl Workflow {
  /// Binds the template against `env` (`{ctx, data, labels, event}`).
  pub fn bind(&self, env: &Value) -> WorkflowResult<BoundWorkflow> {
    let gate = GateConditions {
      if_all: bind_list(&self.if_all, env)?,
      if_any: bind_list(&self.if_any, env)?,
      unless: bind_list(&self.unless, env)?,
      unless_all: bind_list(&self.unless_all, env)?,
      match_: bind_value(&self.match_, env)?,
      unless_match: bind_value(&self.unless_match, env)?,
    };

    let iteration = self.bind_iteration(env)?;
    let action = self.bind_action(env)?;

    Ok(BoundWorkflow {
      name: self.name.clone(),
      description: interpolate_to_string(&self.description, env)?,
      gate,
      iteration,
      action,
      no_export: self.no_export.clone(),
      on_error: self.on_error,
      on_failure: self.on_failure,
      deferred: Deferred {
        loop_conditions: LoopConditions {
          while_all: self.while_all.clone(),
          while_any: self.while_any.clone(),
          until: self.until.clone(),
          until_all: self.until_all.clone(),
          while_match: self.while_match.clone(),
          until_match: self.until_match.clone(),
        },
        else_branch: self.else_branch.clone(),
        exports: ExportSpec {
          export: self.export.clone(),
          on_success: self.export_on_success.clone(),
          on_failure: self.export_on_failure.clone(),
          on_error: self.export_on_error.clone(),
        },
      },
      template: self.clone(),
    })
  }

  fn bind_iteration(&self, env: &Value) -> WorkflowResult<Option<Iteration>> {
    let (source, parallel) = match (&self.iterate, &self.iterate_parallel) {
      (Some(_), Some(_)) => {
        return Err(WorkflowError::InvalidDefinition {
          workflow: self.name.clone(),
          message: String::from("iterate and iterate_parallel are mutually exclusive"),
        })
      }
      (Some(list), None) => (list, false),
      (None, Some(list)) => (list, true),
      (None, None) => return Ok(None),
    };

    let pool = match bind_value(&self.iterate_pool, env)? {
      None | Some(Value::Null) => None,
      Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
      Some(Value::String(s)) if s.trim().is_empty() => None,
      Some(Value::String(s)) => Some(s.trim().parse::<usize>().map_err(|_| WorkflowError::InvalidDefinition {
        workflow: self.name.clone(),
        message: format!("iterate_pool must be a number, got '{s}'"),
      })?),
      Some(other) => {
        return Err(WorkflowError::InvalidDefinition {
          workflow: self.name.clone(),
          message: format!("iterate_pool must be a number, got {other}"),
        })
      }
    }
    .filter(|pool| *pool > 0);

    Ok(Some(Iteration {
      items: Iteration::items_from(interpolate(source, env)?),
      parallel,
      alias: self.iterate_as.clone().filter(|alias| !alias.is_empty()),
      pool,
    }))
  }

  fn bind_action(&self, env: &Value) -> WorkflowResult<Action> {
    if let Some(name) = &self.call_workflow {
      return Ok(Action::Workflow(interpolate_to_string(name, env)?));
    }
    if let Some(target) = &self.call_driver {
      let target = interpolate_to_string(target, env)?;
      let (driver, action) = split_target(&self.name, "call_driver", &target)?;
      return Ok(Action::Function(Function::driver_action(driver, action)));
    }
    if let Some(target) = &self.call_function {
      let target = interpolate_to_string(target, env)?;
      let (system, function) = split_target(&self.name, "call_function", &target)?;
      return Ok(Action::Function(Function::system_function(system, function)));
    }
    if let Some(function) = &self.function {
      let mut bound = function.clone();
      bound.driver = bound.driver.map(|d| interpolate_to_string(&d, env)).transpose()?;
      bound.raw_action = bound.raw_action.map(|a| interpolate_to_string(&a, env)).transpose()?;
      bound.target = bound
        .target
        .map(|t| -> WorkflowResult<FunctionTarget> {
          Ok(FunctionTarget {
            system: interpolate_to_string(&t.system, env)?,
            function: interpolate_to_string(&t.function, env)?,
          })
        })
        .transpose()?;
      return Ok(Action::Function(bound));
    }
    if !self.steps.is_empty() {
      return Ok(Action::Steps(self.steps.clone()));
    }
    if !self.threads.is_empty() {
      return Ok(Action::Threads(self.threads.clone()));
    }
    if let Some(wait) = &self.wait {
      return Ok(Action::Wait(WaitSpec::parse(&interpolate_to_string(wait, env)?)?));
    }
    if let Some(on) = &self.switch {
      return Ok(Action::Switch {
        on: on.clone(),
        cases: self.cases.clone(),
        default: self.default.clone(),
      });
    }
    Ok(Action::None)
  }
}
