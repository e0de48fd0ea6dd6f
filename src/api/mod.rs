//! Remote API module
//!
//! Client and payloads for the test management service.

mod client;
mod error;
mod models;

pub use client::{HttpApiClient, RemoteApi};
pub use error::{ApiError, ApiResult};
pub use models::{
    AttachmentPut, AutotestModel, AutotestPost, AutotestPut, AutotestStep, LabelPost, LinkPost,
    StepResultPost, TestResultPost,
};
