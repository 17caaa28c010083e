// switchyard/src/config/export.rs

//! Function export evaluation: turning a driver reply into the context delta a
//! function call contributes to its session.

use crate::core::context_data::Ctx;
use crate::core::interpolate::interpolate;
use crate::core::merge::merge_override;
use crate::core::message::Status;
use crate::error::{WorkflowError, WorkflowResult};
use crate::workflow::definition::Function;
use serde_json::{json, Value};

/// A function followed through its system references down to a driver action.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFunction {
  pub driver: String,
  pub raw_action: String,
  /// Merged parameters. Raw templates until `bind_parameters` runs at dispatch time.
  pub parameters: Value,
  pub sys_data: Value,
  /// The definitions followed, caller first.
  pub chain: Vec<Function>,
}

impl ResolvedFunction {
  /// Interpolates the parameters against `env` extended with `sysData`.
  pub fn bind_parameters(&mut self, env: &Value) -> WorkflowResult<()> {
    let env = self.extend_env(env, false);
    self.parameters = interpolate(&self.parameters, &env)?;
    Ok(())
  }

  /// The environment an export sees: the session env plus `sysData` and (once bound)
  /// `params`.
  fn extend_env(&self, env: &Value, with_params: bool) -> Value {
    let mut env = env.clone();
    if let Value::Object(map) = &mut env {
      map.insert("sysData".to_string(), self.sys_data.clone());
      if with_params {
        map.insert("params".to_string(), self.parameters.clone());
      }
    }
    env
  }

  /// The `function` section of an outgoing command payload.
  pub fn to_payload(&self) -> Value {
    json!({
      "driver": self.driver,
      "rawAction": self.raw_action,
      "parameters": self.parameters,
    })
  }
}

/// Evaluates the export maps of every function in the chain, innermost first so that
/// callers override the functions they wrap. For each function the generic `export`
/// applies before the one selected by `status`.
pub fn export_function_context(function: &ResolvedFunction, env: &Value, status: Status) -> WorkflowResult<Ctx> {
  let env = function.extend_env(env, true);
  let mut delta = Ctx::new();

  for f in function.chain.iter().rev() {
    let specific = match status {
      Status::Success => f.export_on_success.as_ref(),
      Status::Failure => f.export_on_failure.as_ref(),
      Status::Error => f.export_on_error.as_ref(),
    };
    for template in f.export.iter().chain(specific) {
      match interpolate(template, &env)? {
        Value::Object(map) => merge_override(&mut delta, &map),
        Value::Null => {}
        other => {
          return Err(WorkflowError::InvalidDefinition {
            workflow: format!("{}.{}", function.driver, function.raw_action),
            message: format!("export must be a map, got {other}"),
          })
        }
      }
    }
  }

  Ok(delta)
}
