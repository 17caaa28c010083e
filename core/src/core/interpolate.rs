// switchyard/src/core/interpolate.rs

//! Template interpolation over JSON trees.
//!
//! Supported string forms:
//!  - `{{ ctx.name }}` / `{% if ... %}`: rendered with minijinja against the environment.
//!    Undefined lookups chain and render as an empty string.
//!  - `$ctx.a.b,data.x,"fallback"`: a path reference returning the raw value of the first
//!    alternative found. A trailing `?` makes a missing value `null` instead of an error.
//!  - `:yaml:...`: the (rendered) remainder is parsed as YAML.
//!  - `:raw:...`: the remainder is returned untouched.

use crate::error::{WorkflowError, WorkflowResult};
use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use serde_json::Value;

static TEMPLATES: Lazy<Environment<'static>> = Lazy::new(|| {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Chainable);
  env
});

const RAW_PREFIX: &str = ":raw:";
const YAML_PREFIX: &str = ":yaml:";

/// Interpolates every string in `value` (recursively through lists and maps) against `env`.
/// Map keys are left as they are.
pub fn interpolate(value: &Value, env: &Value) -> WorkflowResult<Value> {
  match value {
    Value::String(s) => interpolate_str(s, env),
    Value::Array(items) => items
      .iter()
      .map(|item| interpolate(item, env))
      .collect::<WorkflowResult<Vec<_>>>()
      .map(Value::Array),
    Value::Object(map) => {
      let mut out = serde_json::Map::with_capacity(map.len());
      for (key, item) in map {
        out.insert(key.clone(), interpolate(item, env)?);
      }
      Ok(Value::Object(out))
    }
    other => Ok(other.clone()),
  }
}

/// Interpolates a single string.
pub fn interpolate_str(template: &str, env: &Value) -> WorkflowResult<Value> {
  if let Some(raw) = template.strip_prefix(RAW_PREFIX) {
    return Ok(Value::String(raw.to_string()));
  }
  if is_path_reference(template) {
    return resolve_reference(template, env);
  }

  let rendered = if template.contains("{{") || template.contains("{%") {
    TEMPLATES
      .render_str(template, env)
      .map_err(|e| WorkflowError::Interpolation {
        template: template.to_string(),
        message: e.to_string(),
      })?
  } else {
    template.to_string()
  };

  match rendered.strip_prefix(YAML_PREFIX) {
    Some(yaml) => serde_yaml::from_str::<Value>(yaml).map_err(|e| WorkflowError::Interpolation {
      template: template.to_string(),
      message: e.to_string(),
    }),
    None => Ok(Value::String(rendered)),
  }
}

/// Renders a template into a plain string; non-string results are serialized as JSON.
pub fn interpolate_to_string(template: &str, env: &Value) -> WorkflowResult<String> {
  Ok(match interpolate_str(template, env)? {
    Value::String(s) => s,
    Value::Null => String::new(),
    other => other.to_string(),
  })
}

fn is_path_reference(s: &str) -> bool {
  let mut chars = s.chars();
  chars.next() == Some('$') && chars.next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
}

fn resolve_reference(template: &str, env: &Value) -> WorkflowResult<Value> {
  let body = &template[1..];
  let (body, optional) = match body.strip_suffix('?') {
    Some(b) => (b, true),
    None => (body, false),
  };

  for alternative in split_alternatives(body) {
    let alternative = alternative.trim();
    if let Some(literal) = unquote(alternative) {
      return Ok(Value::String(literal.to_string()));
    }
    if let Some(found) = lookup_path(env, alternative) {
      if !found.is_null() {
        return Ok(found.clone());
      }
    }
  }

  if optional {
    Ok(Value::Null)
  } else {
    Err(WorkflowError::Interpolation {
      template: template.to_string(),
      message: String::from("no alternative resolved to a value"),
    })
  }
}

fn split_alternatives(body: &str) -> Vec<&str> {
  let mut parts = Vec::new();
  let mut quote: Option<char> = None;
  let mut start = 0;
  for (idx, c) in body.char_indices() {
    match (quote, c) {
      (None, '"') | (None, '\'') => quote = Some(c),
      (Some(q), c) if c == q => quote = None,
      (None, ',') => {
        parts.push(&body[start..idx]);
        start = idx + 1;
      }
      _ => {}
    }
  }
  parts.push(&body[start..]);
  parts
}

fn unquote(s: &str) -> Option<&str> {
  if s.len() >= 2 {
    for q in ['"', '\''] {
      if s.starts_with(q) && s.ends_with(q) {
        return Some(&s[1..s.len() - 1]);
      }
    }
  }
  None
}

/// Walks a dotted path (`ctx.items.0.name`) through maps and lists.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
  path
    .split('.')
    .filter(|segment| !segment.is_empty())
    .try_fold(root, |node, segment| match node {
      Value::Object(map) => map.get(segment),
      Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
      _ => None,
    })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn env() -> Value {
    json!({
      "ctx": {"name": "web", "items": ["a", "b"], "nested": {"port": 8080}},
      "data": {"status": "ok"},
      "labels": {"status": "success"},
    })
  }

  #[test]
  fn renders_templates() {
    let out = interpolate_str("deploy {{ ctx.name }}:{{ ctx.nested.port }}", &env()).unwrap();
    assert_eq!(out, json!("deploy web:8080"));
  }

  #[test]
  fn undefined_renders_empty() {
    let out = interpolate_str("{{ ctx.missing.deeper }}", &env()).unwrap();
    assert_eq!(out, json!(""));
  }

  #[test]
  fn path_reference_returns_raw_value() {
    assert_eq!(interpolate_str("$ctx.items", &env()).unwrap(), json!(["a", "b"]));
    assert_eq!(interpolate_str("$ctx.items.1", &env()).unwrap(), json!("b"));
  }

  #[test]
  fn path_reference_alternatives_and_literals() {
    assert_eq!(interpolate_str("$ctx.nope,data.status", &env()).unwrap(), json!("ok"));
    assert_eq!(interpolate_str("$ctx.nope,'fallback, really'", &env()).unwrap(), json!("fallback, really"));
    assert_eq!(interpolate_str("$ctx.nope?", &env()).unwrap(), Value::Null);
    assert!(interpolate_str("$ctx.nope", &env()).is_err());
  }

  #[test]
  fn dollar_amounts_are_not_references() {
    assert_eq!(interpolate_str("$5 off", &env()).unwrap(), json!("$5 off"));
  }

  #[test]
  fn yaml_prefix_parses_rendered_text() {
    let out = interpolate_str(":yaml:[{{ ctx.nested.port }}, 2]", &env()).unwrap();
    assert_eq!(out, json!([8080, 2]));
  }

  #[test]
  fn raw_prefix_skips_rendering() {
    assert_eq!(interpolate_str(":raw:{{ ctx.name }}", &env()).unwrap(), json!("{{ ctx.name }}"));
  }

  #[test]
  fn interpolates_nested_structures() {
    let tpl = json!({"target": "{{ ctx.name }}", "list": ["$data.status", 3]});
    assert_eq!(interpolate(&tpl, &env()).unwrap(), json!({"target": "web", "list": ["ok", 3]}));
  }
}
