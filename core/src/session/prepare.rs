// switchyard/src/session/prepare.rs

//! Building a session's context and binding its workflow.

use super::Session;
use crate::config::{DEFAULT_CONTEXT, EVENTS_SECTION, GLOBAL_SECTION};
use crate::core::context_data::Ctx;
use crate::core::interpolate::{interpolate, interpolate_to_string};
use crate::core::message::Message;
use crate::error::{WorkflowError, WorkflowResult};
use serde_json::Value;
use tracing::{event, Level};

const HOOKS_KEY: &str = "hooks";
const META_NAME: &str = "_meta_name";
const META_DESCRIPTION: &str = "_meta_description";

impl Session {
  /// Prepares the context and binds the workflow.
  ///
  /// Order: parent context (without `hooks`), `extra` keys from the caller, the
  /// triggering event (root only), named contexts, `with` layers, binding, policy
  /// inheritance, metadata. Each named context section and each `with` layer is
  /// interpolated against the context as it stands when it is reached.
  pub(crate) fn prepare(&self, msg: &Message, parent: Option<&Session>, extra: Ctx) -> WorkflowResult<()> {
    if let Some(parent) = parent {
      let mut ctx = parent.ctx.snapshot();
      ctx.remove(HOOKS_KEY);
      *self.ctx.write() = ctx;
      let (event, loaded) = {
        let pst = parent.state.lock();
        (pst.event.clone(), pst.loaded_contexts.clone())
      };
      let mut st = self.state.lock();
      st.event = event;
      st.loaded_contexts = loaded;
    } else {
      let event = msg.payload.get("data").cloned().unwrap_or(Value::Null);
      self.state.lock().event = event;
    }

    if !extra.is_empty() {
      self.ctx.merge(&extra);
    }

    self.load_named_contexts(msg, parent.is_none())?;
    self.merge_local_layers(msg)?;

    let env = self.env_data(msg);
    let mut bound = self.template.bind(&env)?;
    if let Some(parent_bound) = parent.and_then(|p| p.bound.get()) {
      bound.on_error = bound.on_error.or(parent_bound.on_error);
      bound.on_failure = bound.on_failure.or(parent_bound.on_failure);
    }

    if !self.is_hook {
      self.ctx.insert(META_NAME, Value::String(bound.name.clone()));
      self.ctx.insert(META_DESCRIPTION, Value::String(bound.description.clone()));
    }

    self
      .bound
      .set(bound)
      .map_err(|_| WorkflowError::Internal(format!("session '{}' prepared twice", self.template.name)))?;
    event!(Level::DEBUG, workflow = %self.template.name, root = parent.is_none(), "Session prepared.");
    Ok(())
  }

  /// Context names requested by the workflow: `context` then `contexts`, each
  /// interpolated. `contexts` may be a list or a single name.
  fn requested_contexts(&self, msg: &Message) -> WorkflowResult<Vec<String>> {
    let env = self.env_data(msg);
    let mut names = Vec::new();
    if let Some(name) = &self.template.context {
      names.push(interpolate_to_string(name, &env)?);
    }
    if let Some(list) = &self.template.contexts {
      match interpolate(list, &env)? {
        Value::Array(items) => {
          for item in items {
            match item {
              Value::String(name) => names.push(name),
              other => {
                return Err(WorkflowError::InvalidDefinition {
                  workflow: self.template.name.clone(),
                  message: format!("contexts entries must be names, got {other}"),
                })
              }
            }
          }
        }
        Value::String(name) => names.push(name),
        Value::Null => {}
        other => {
          return Err(WorkflowError::InvalidDefinition {
            workflow: self.template.name.clone(),
            message: format!("contexts must be a list of names, got {other}"),
          })
        }
      }
    }
    names.retain(|name| !name.is_empty());
    Ok(names)
  }

  fn load_named_contexts(&self, msg: &Message, is_root: bool) -> WorkflowResult<()> {
    let config = self.store.config();
    let requested = self.requested_contexts(msg)?;

    let mut plan: Vec<(String, String)> = Vec::new();
    let mut sections = vec![GLOBAL_SECTION.to_string()];
    if is_root {
      sections.push(EVENTS_SECTION.to_string());
    }
    if !self.template.name.is_empty() {
      sections.push(self.template.name.clone());
    }

    if config.has_context(DEFAULT_CONTEXT) {
      for section in &sections {
        plan.push((DEFAULT_CONTEXT.to_string(), section.clone()));
      }
    }
    for name in requested {
      if !config.has_context(&name) {
        return Err(WorkflowError::ContextNotFound { name });
      }
      for section in sections.iter().filter(|s| s.as_str() != EVENTS_SECTION) {
        plan.push((name.clone(), section.clone()));
      }
    }
    let own = &self.template.name;
    if !own.is_empty() && own.as_str() != DEFAULT_CONTEXT && config.has_context(own) {
      for section in sections.iter().filter(|s| s.as_str() != EVENTS_SECTION) {
        plan.push((own.clone(), section.clone()));
      }
    }

    for (name, section) in plan {
      let key = format!("{name}/{section}");
      if self.state.lock().loaded_contexts.contains(&key) {
        continue;
      }
      let Some(raw) = config.context_section(&name, &section) else {
        continue;
      };
      let env = self.env_data(msg);
      match interpolate(raw, &env)? {
        Value::Object(delta) => self.ctx.merge(&delta),
        Value::Null => {}
        other => {
          return Err(WorkflowError::InvalidDefinition {
            workflow: self.template.name.clone(),
            message: format!("context '{key}' must be a map, got {other}"),
          })
        }
      }
      event!(Level::TRACE, context = %key, "Named context merged.");
      self.state.lock().loaded_contexts.insert(key);
    }
    Ok(())
  }

  fn merge_local_layers(&self, msg: &Message) -> WorkflowResult<()> {
    let layers = match &self.template.with {
      None | Some(Value::Null) => return Ok(()),
      Some(Value::Array(layers)) => layers.clone(),
      Some(layer) => vec![layer.clone()],
    };
    for layer in layers {
      let env = self.env_data(msg);
      match interpolate(&layer, &env)? {
        Value::Object(delta) => self.ctx.merge(&delta),
        Value::Null => {}
        other => {
          return Err(WorkflowError::InvalidDefinition {
            workflow: self.template.name.clone(),
            message: format!("with layers must be maps, got {other}"),
          })
        }
      }
    }
    Ok(())
  }
}
