// switchyard/src/conditional/truthy.rs

use serde_json::Value;

/// A string is falsy iff, trimmed and lowercased, it is one of these. `<no value>` is
/// how an undefined template reference renders in some template engines.
const FALSY: [&str; 7] = ["", "false", "nil", "0", "{}", "[]", "<no value>"];

pub fn is_truthy_str(s: &str) -> bool {
  let normalized = s.trim().to_lowercase();
  !FALSY.contains(&normalized.as_str())
}

/// Truthiness of an interpolated condition value.
pub fn is_truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
    Value::String(s) => is_truthy_str(s),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}
