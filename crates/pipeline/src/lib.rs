//! Analysis job orchestration.
//!
//! Sits between the HTTP surface and persistence: the [`JobStore`] seam with
//! its Postgres and in-memory backends, worker dispatch, operator
//! mutations, worker write-back, detection for stored jobs, and the
//! headless pollers and queue aggregator.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod detection;
pub mod dispatcher;
pub mod error;
pub mod poller;
pub mod store;
pub mod writeback;

pub use aggregator::QueueAggregator;
pub use config::PollConfig;
pub use controller::{GuardKey, InFlightGuard, JobController, Mutation};
pub use detection::DetectionService;
pub use dispatcher::Dispatcher;
pub use error::PipelineError;
pub use poller::Poller;
pub use store::{JobStore, MemoryJobStore, PgJobStore, StoreError};
pub use writeback::WorkerWriteBack;
