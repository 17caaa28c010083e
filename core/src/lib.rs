// src/lib.rs

//! Switchyard: an event-driven workflow session engine.
//!
//! Declarative workflows are driven by asynchronous messages exchanged with
//! external drivers. Switchyard supports:
//!  - Gate conditions (`if`, `unless`, `match` ...) and loops (`while`, `until` ...).
//!  - Serial and pooled parallel iteration over lists and maps.
//!  - Sequential `steps`, concurrent `threads`, `switch` branching and sub-workflows.
//!  - Lifecycle hooks (`on_session`, `on_round`, `on_action`, `on_success` ...).
//!  - Suspension under a resume token, with optional timeout.
//!  - Context export from calls and children back into their parents.

pub mod conditional;
pub mod config;
pub mod core;
pub mod error;
pub mod session;
pub mod store;
pub mod workflow;

// --- Re-exports for the Public API ---

pub use crate::core::context_data::{ContextData, Ctx};
pub use crate::core::control::{ErrorPolicy, HookPoint, Route};
pub use crate::core::message::{Message, Status};

pub use crate::workflow::{Action, BoundWorkflow, Function, FunctionTarget, Workflow};

pub use crate::config::{Config, EngineOptions, ResolvedFunction, System};

pub use crate::session::{Routing, Session, SessionSummary};
pub use crate::store::{EventSummary, Host, SessionId, SessionResult, SessionStore};

pub use crate::error::{WorkflowError, WorkflowResult};

/*
    Session lifecycle:
    1. The host calls `SessionStore::start_session` with a workflow and the triggering event.
    2. The session prepares its context (named contexts, `with` layers) and binds the workflow.
    3. Dispatching an action sends a `command` message through `Host::send_message`, or starts
       child sessions, then returns.
    4. Driver replies come back through `SessionStore::handle_return` / `continue_session`;
       the session merges exports and `route_next` picks exactly one route.
    5. On completion the session reports to its parent, or emits its `_output` to the host.
*/
