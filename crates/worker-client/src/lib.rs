//! HTTP client for the external analysis worker.
//!
//! Provides the REST wrapper, its configuration, and the [`WorkerTrigger`]
//! seam the dispatcher uses.

pub mod api;
pub mod config;
pub mod trigger;

pub use api::{TriggerResponse, WorkerApi, WorkerApiError};
pub use config::WorkerClientConfig;
pub use trigger::WorkerTrigger;
