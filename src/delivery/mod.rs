//! Delivery pipeline
//!
//! Realtime and bulk delivery of finished results.

mod bulk;
mod manager;
mod retry;

pub use bulk::{BulkSlots, CreateEntry, UpdateEntry, WorkItemDiff};
pub use manager::AdapterManager;
pub use retry::RetryPolicy;
