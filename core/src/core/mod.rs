pub mod context_data;
pub mod control;
pub mod interpolate;
pub mod merge;
pub mod message;

// Re-export key types for easier access from other modules (and lib.rs)
pub use context_data::{ContextData, Ctx};
pub use control::{ErrorPolicy, HookPoint, Route};
pub use message::{Message, Status};
