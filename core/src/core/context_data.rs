// switchyard/src/core/context_data.rs
use crate::core::merge::merge_override;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::{Map, Value};
use std::sync::Arc;

/// The session blackboard: string keys to arbitrary JSON values.
pub type Ctx = Map<String, Value>;

/// A wrapper for session context providing shared ownership and interior mutability
/// using parking_lot::RwLock. This lock is the per-session context lock: thread and
/// parallel-iteration children may report concurrently and all of them merge through it.
///
/// IMPORTANT: Lock guards obtained from this struct are blocking and MUST NOT
/// be held while calling into another session.
#[derive(Debug)]
pub struct ContextData<T: Send + Sync + 'static>(Arc<RwLock<T>>);

impl<T: Send + Sync + 'static> ContextData<T> {
  pub fn new(data: T) -> Self {
    ContextData(Arc::new(RwLock::new(data)))
  }

  /// Acquires a read lock.
  pub fn read(&self) -> RwLockReadGuard<'_, T> {
    self.0.read()
  }

  /// Acquires a write lock.
  pub fn write(&self) -> RwLockWriteGuard<'_, T> {
    self.0.write()
  }
}

impl<T: Clone + Send + Sync + 'static> ContextData<T> {
  /// Clones the data out under a read lock. The copy never aliases the original.
  pub fn snapshot(&self) -> T {
    self.read().clone()
  }
}

impl ContextData<Ctx> {
  pub fn get(&self, key: &str) -> Option<Value> {
    self.read().get(key).cloned()
  }

  pub fn insert(&self, key: impl Into<String>, value: Value) {
    self.write().insert(key.into(), value);
  }

  /// Merges `delta` into the context, honouring `key+` / `key-` append/prepend keys.
  pub fn merge(&self, delta: &Ctx) {
    let mut guard = self.write();
    merge_override(&mut guard, delta);
  }

  /// Reads a string entry, ignoring non-string values.
  pub fn get_str(&self, key: &str) -> Option<String> {
    match self.read().get(key) {
      Some(Value::String(s)) => Some(s.clone()),
      _ => None,
    }
  }
}

impl<T: Send + Sync + 'static> Clone for ContextData<T> {
  fn clone(&self) -> Self {
    ContextData(Arc::clone(&self.0))
  }
}

impl<T: Send + Sync + 'static + Default> Default for ContextData<T> {
  fn default() -> Self {
    Self::new(Default::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn snapshot_does_not_alias() {
    let parent = ContextData::new(Ctx::new());
    parent.insert("nested", json!({"a": 1}));
    let child = ContextData::new(parent.snapshot());
    child.merge(json!({"nested": {"a": 2}}).as_object().unwrap());
    assert_eq!(parent.get("nested"), Some(json!({"a": 1})));
    assert_eq!(child.get("nested"), Some(json!({"a": 2})));
  }

  #[test]
  fn clone_shares_data() {
    let ctx = ContextData::new(Ctx::new());
    let shared = ctx.clone();
    shared.insert("k", json!("v"));
    assert_eq!(ctx.get_str("k").as_deref(), Some("v"));
  }
}
