//! Change notification plumbing.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ChangeEvent`]: a row change on `analysis_jobs` or `embryo_scores`.
//! - [`ChangeListener`]: background service republishing Postgres
//!   notifications on the bus.

pub mod bus;
pub mod listener;

pub use bus::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
pub use listener::{ChangeListener, ReconnectConfig, CHANGE_CHANNEL};
