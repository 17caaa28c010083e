// switchyard/src/conditional/matcher.rs

//! Skeleton matching for `match` / `unless_match` / `while_match` / `until_match`.
//!
//! Rules, applied to `compare(actual, criteria)`:
//!  - `null` criteria match anything.
//!  - A list of criteria matches if any element matches.
//!  - A map with an `:all:` key matches a list only if every element matches `:all:`.
//!  - Any other criteria against a list matches if any element matches.
//!  - A map matches a map key by key; `:absent:` names keys that must be missing.
//!  - A string criteria prefixed `:regex:` is a regular expression; other scalars compare
//!    by string equality.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{event, Level};

const REGEX_PREFIX: &str = ":regex:";
const ALL_KEY: &str = ":all:";
const ABSENT_KEY: &str = ":absent:";

static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn compare(actual: &Value, criteria: &Value) -> bool {
  match criteria {
    Value::Null => true,
    Value::Array(options) => options.iter().any(|c| compare(actual, c)),
    Value::Object(skeleton) => {
      if let Some(each) = skeleton.get(ALL_KEY) {
        return match actual {
          Value::Array(items) => items.iter().all(|a| compare(a, each)),
          single => compare(single, each),
        };
      }
      match actual {
        Value::Array(items) => items.iter().any(|a| compare(a, criteria)),
        Value::Object(map) => compare_map(map, skeleton),
        _ => false,
      }
    }
    scalar => match actual {
      Value::Array(items) => items.iter().any(|a| compare(a, scalar)),
      _ => compare_scalar(actual, scalar),
    },
  }
}

fn compare_map(actual: &Map<String, Value>, skeleton: &Map<String, Value>) -> bool {
  if let Some(absent) = skeleton.get(ABSENT_KEY) {
    let keys: Vec<&str> = match absent {
      Value::String(key) => vec![key.as_str()],
      Value::Array(keys) => keys.iter().filter_map(Value::as_str).collect(),
      _ => Vec::new(),
    };
    if keys.iter().any(|key| actual.contains_key(*key)) {
      return false;
    }
  }

  skeleton
    .iter()
    .filter(|(key, _)| key.as_str() != ABSENT_KEY)
    .all(|(key, expected)| match actual.get(key) {
      Some(value) => compare(value, expected),
      None => expected.is_null(),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn compare_scalar(actual: &Value, criteria: &Value) -> bool {
  let Some(actual) = scalar_text(actual) else {
    return false;
  };
  match criteria {
    Value::String(c) => match c.strip_prefix(REGEX_PREFIX) {
      Some(pattern) => regex_matches(pattern, &actual),
      None => *c == actual,
    },
    other => scalar_text(other).map_or(false, |c| c == actual),
  }
}

fn regex_matches(pattern: &str, text: &str) -> bool {
  let mut cache = REGEX_CACHE.lock();
  let compiled = cache.entry(pattern.to_string()).or_insert_with(|| match Regex::new(pattern) {
    Ok(re) => Some(re),
    Err(e) => {
      event!(Level::WARN, %pattern, error = %e, "Invalid regex in match criteria; treated as no match.");
      None
    }
  });
  compiled.as_ref().map_or(false, |re| re.is_match(text))
}
