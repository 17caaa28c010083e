// switchyard/src/core/control.rs

//! Signals that steer a session: the route chosen after a reply, error policies,
//! and the lifecycle hook points.

use crate::core::message::Status;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The state transition chosen by the router after a reply has been processed.
///
/// Exactly one route is chosen per reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// Finish the session and report to the parent (or the originating event).
  Complete,
  /// Dispatch the next child of a `steps` block.
  NextStep,
  /// A `threads` child reported but others are outstanding; the reply is absorbed.
  NextThread,
  /// Run the action again for the next item of a serial `iterate`.
  NextIteration,
  /// A parallel iteration child finished; admit the next pooled item, if any.
  NextParallelIteration,
  /// The loop condition still holds; start another round.
  NextRound,
}

/// What to do when a call reports `error` or `failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
  Exit,
  Continue,
}

/// Named interception points. The hook workflow is looked up in `ctx.hooks.<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
  OnSession,
  OnFirstRound,
  OnRound,
  OnFirstItem,
  OnItem,
  OnFirstAction,
  OnAction,
  OnSuccess,
  OnFailure,
  OnError,
  OnExit,
}

impl HookPoint {
  pub fn as_str(&self) -> &'static str {
    match self {
      HookPoint::OnSession => "on_session",
      HookPoint::OnFirstRound => "on_first_round",
      HookPoint::OnRound => "on_round",
      HookPoint::OnFirstItem => "on_first_item",
      HookPoint::OnItem => "on_item",
      HookPoint::OnFirstAction => "on_first_action",
      HookPoint::OnAction => "on_action",
      HookPoint::OnSuccess => "on_success",
      HookPoint::OnFailure => "on_failure",
      HookPoint::OnError => "on_error",
      HookPoint::OnExit => "on_exit",
    }
  }

  /// The completion hook matching a final status.
  pub fn for_status(status: Status) -> Self {
    match status {
      Status::Success => HookPoint::OnSuccess,
      Status::Failure => HookPoint::OnFailure,
      Status::Error => HookPoint::OnError,
    }
  }

  pub fn is_completion(&self) -> bool {
    matches!(
      self,
      HookPoint::OnSuccess | HookPoint::OnFailure | HookPoint::OnError | HookPoint::OnExit
    )
  }
}

impl fmt::Display for HookPoint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}
