//! Execution context storage
//!
//! Per-thread ordered collections of active result items. A thread that has
//! nothing of its own reads through to the primary thread's items.

mod store;

pub use store::{ContextStore, ContextView};
