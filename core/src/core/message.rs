// switchyard/src/core/message.rs

//! The message envelope exchanged with drivers and the completion status taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub const CHANNEL_EVENTBUS: &str = "eventbus";
pub const SUBJECT_COMMAND: &str = "command";
pub const SUBJECT_RETURN: &str = "return";

pub const LABEL_STATUS: &str = "status";
pub const LABEL_REASON: &str = "reason";
pub const LABEL_SESSION_ID: &str = "sessionID";
pub const LABEL_EVENT_ID: &str = "eventID";

/// Outcome of a call, a session or a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
  /// Normal completion.
  Success,
  /// Expected negative outcome.
  Failure,
  /// Unexpected fault or misconfiguration.
  Error,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Success => "success",
      Status::Failure => "failure",
      Status::Error => "error",
    }
  }

  /// Reads a status label. A missing label is a success (trigger events carry none);
  /// anything unrecognised is treated as an error.
  pub fn from_label(label: Option<&str>) -> Self {
    match label.map(str::trim) {
      None | Some("") | Some("success") => Status::Success,
      Some("failure") => Status::Failure,
      Some(_) => Status::Error,
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A bus message: driver command, driver reply, trigger event or resume event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
  pub channel: String,
  pub subject: String,
  #[serde(default)]
  pub labels: HashMap<String, String>,
  #[serde(default)]
  pub payload: Value,
}

impl Message {
  pub fn new(channel: impl Into<String>, subject: impl Into<String>) -> Self {
    Self {
      channel: channel.into(),
      subject: subject.into(),
      labels: HashMap::new(),
      payload: Value::Null,
    }
  }

  /// A `return` message carrying the given status, as drivers send them back.
  pub fn reply(status: Status, reason: Option<&str>, payload: Value) -> Self {
    let mut msg = Message::new(CHANNEL_EVENTBUS, SUBJECT_RETURN).with_label(LABEL_STATUS, status.as_str());
    if let Some(reason) = reason {
      msg.labels.insert(LABEL_REASON.to_string(), reason.to_string());
    }
    msg.payload = payload;
    msg
  }

  pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.labels.insert(key.into(), value.into());
    self
  }

  pub fn with_payload(mut self, payload: Value) -> Self {
    self.payload = payload;
    self
  }

  pub fn label(&self, key: &str) -> Option<&str> {
    self.labels.get(key).map(String::as_str)
  }

  pub fn status(&self) -> Status {
    Status::from_label(self.label(LABEL_STATUS))
  }

  pub fn reason(&self) -> Option<&str> {
    self.label(LABEL_REASON)
  }

  pub fn session_id(&self) -> Option<&str> {
    self.label(LABEL_SESSION_ID).filter(|id| !id.is_empty())
  }

  pub fn event_id(&self) -> Option<&str> {
    self.label(LABEL_EVENT_ID)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn missing_status_reads_as_success() {
    let msg = Message::new(CHANNEL_EVENTBUS, "message");
    assert_eq!(msg.status(), Status::Success);
  }

  #[test]
  fn unknown_status_reads_as_error() {
    let msg = Message::new(CHANNEL_EVENTBUS, SUBJECT_RETURN).with_label(LABEL_STATUS, "blocked");
    assert_eq!(msg.status(), Status::Error);
  }

  #[test]
  fn reply_sets_status_reason_and_payload() {
    let msg = Message::reply(Status::Failure, Some("nope"), json!({"a": 1}));
    assert_eq!(msg.subject, SUBJECT_RETURN);
    assert_eq!(msg.status(), Status::Failure);
    assert_eq!(msg.reason(), Some("nope"));
    assert_eq!(msg.payload["a"], 1);
  }
}
