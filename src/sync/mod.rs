//! Worker coordination
//!
//! Client and service used when several worker processes report into the
//! same test run.

mod client;
mod error;
mod server;

pub use client::SyncStorageRunner;
pub use error::{SyncError, SyncResult};
pub use server::{router, serve, SyncStorageState};
