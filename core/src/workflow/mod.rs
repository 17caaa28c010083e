// switchyard/src/workflow/mod.rs

//! Workflow definitions in their two phases: `definition` (the raw template as
//! loaded) and `bound` (interpolated against one session's context).

pub mod bound;
pub mod definition;
pub mod duration;

pub use bound::{Action, BoundWorkflow, Iteration, WaitSpec};
pub use definition::{Function, FunctionTarget, Workflow};
