// switchyard/src/core/merge.rs

//! Context merging. A key suffixed with `+` appends to the existing value, a key
//! suffixed with `-` prepends to it; any other key deep-merges maps and overrides
//! everything else (last write wins).

use serde_json::{Map, Value};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Placement {
  Append,
  Prepend,
}

fn split_suffix(key: &str) -> Option<(&str, Placement)> {
  if key.len() < 2 {
    return None;
  }
  if let Some(base) = key.strip_suffix('+') {
    return Some((base, Placement::Append));
  }
  if let Some(base) = key.strip_suffix('-') {
    return Some((base, Placement::Prepend));
  }
  None
}

/// Merges `src` into `dst`.
pub fn merge_override(dst: &mut Map<String, Value>, src: &Map<String, Value>) {
  for (key, value) in src {
    if let Some((base, placement)) = split_suffix(key) {
      let combined = combine(dst.remove(base), value, placement);
      dst.insert(base.to_string(), combined);
      continue;
    }

    match (dst.get_mut(key), value) {
      (Some(Value::Object(existing)), Value::Object(incoming)) => merge_override(existing, incoming),
      _ => {
        dst.insert(key.clone(), value.clone());
      }
    }
  }
}

fn combine(existing: Option<Value>, value: &Value, placement: Placement) -> Value {
  match (existing, value) {
    (None, v) | (Some(Value::Null), v) => v.clone(),
    (Some(Value::Array(mut items)), Value::Array(more)) => {
      match placement {
        Placement::Append => items.extend(more.iter().cloned()),
        Placement::Prepend => {
          let mut front = more.clone();
          front.append(&mut items);
          items = front;
        }
      }
      Value::Array(items)
    }
    (Some(Value::Array(mut items)), single) => {
      match placement {
        Placement::Append => items.push(single.clone()),
        Placement::Prepend => items.insert(0, single.clone()),
      }
      Value::Array(items)
    }
    (Some(Value::String(s)), Value::String(more)) => match placement {
      Placement::Append => Value::String(s + more),
      Placement::Prepend => Value::String(format!("{more}{s}")),
    },
    (Some(Value::Object(mut map)), Value::Object(more)) => {
      match placement {
        Placement::Append => merge_override(&mut map, more),
        Placement::Prepend => {
          // existing keys win when prepending
          let mut front = more.clone();
          merge_override(&mut front, &map);
          map = front;
        }
      }
      Value::Object(map)
    }
    (Some(_), v) => v.clone(),
  }
}

/// Returns `delta` without the keys listed in `no_export`. `*` strips everything;
/// a key `k` also strips `k+` and `k-`.
pub fn strip_no_export(delta: &Map<String, Value>, no_export: &[String]) -> Map<String, Value> {
  if no_export.iter().any(|k| k == "*") {
    return Map::new();
  }
  let mut stripped = delta.clone();
  for key in no_export {
    stripped.remove(key);
    stripped.remove(&format!("{key}+"));
    stripped.remove(&format!("{key}-"));
  }
  stripped
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn obj(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
  }

  #[test]
  fn append_and_prepend_lists() {
    let mut ctx = obj(json!({"list": [2]}));
    merge_override(&mut ctx, &obj(json!({"list+": [3], "list-": [1]})));
    assert_eq!(ctx["list"], json!([1, 2, 3]));
  }

  #[test]
  fn append_to_missing_key_creates_it() {
    let mut ctx = Map::new();
    merge_override(&mut ctx, &obj(json!({"names+": ["a"]})));
    assert_eq!(ctx["names"], json!(["a"]));
  }

  #[test]
  fn strings_concatenate() {
    let mut ctx = obj(json!({"s": "mid"}));
    merge_override(&mut ctx, &obj(json!({"s+": "-end"})));
    merge_override(&mut ctx, &obj(json!({"s-": "start-"})));
    assert_eq!(ctx["s"], json!("start-mid-end"));
  }

  #[test]
  fn nested_maps_deep_merge() {
    let mut ctx = obj(json!({"a": {"x": 1, "y": 1}}));
    merge_override(&mut ctx, &obj(json!({"a": {"y": 2, "z": 3}})));
    assert_eq!(ctx["a"], json!({"x": 1, "y": 2, "z": 3}));
  }

  #[test]
  fn disjoint_deltas_commute() {
    let d1 = obj(json!({"a": 1, "m": {"x": 1}}));
    let d2 = obj(json!({"b": 2, "m": {"y": 2}}));
    let mut left = Map::new();
    merge_override(&mut left, &d1);
    merge_override(&mut left, &d2);
    let mut right = Map::new();
    merge_override(&mut right, &d2);
    merge_override(&mut right, &d1);
    assert_eq!(left, right);
  }

  #[test]
  fn same_key_last_write_wins() {
    let mut ctx = Map::new();
    merge_override(&mut ctx, &obj(json!({"k": "first"})));
    merge_override(&mut ctx, &obj(json!({"k": "second"})));
    assert_eq!(ctx["k"], json!("second"));
  }

  #[test]
  fn no_export_wildcard_empties_delta() {
    let delta = obj(json!({"a": 1, "b": 2}));
    assert!(strip_no_export(&delta, &["*".to_string()]).is_empty());
  }

  #[test]
  fn no_export_strips_suffix_variants() {
    let delta = obj(json!({"key": 1, "key+": [2], "key-": [0], "other": 3}));
    let stripped = strip_no_export(&delta, &["key".to_string()]);
    assert_eq!(Value::Object(stripped), json!({"other": 3}));
  }
}
