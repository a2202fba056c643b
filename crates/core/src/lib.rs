pub mod analysis_job;
pub mod config;
pub mod correction;
pub mod detection;
pub mod error;
pub mod frame;
pub mod queue;
pub mod scoring;
pub mod sync;
pub mod types;
