//! In-process change bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans out [`ChangeEvent`]s (row inserts/updates on jobs and
//! scores) to pollers. It is designed to be shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use embryoscore_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// Table a change happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    AnalysisJobs,
    EmbryoScores,
}

impl ChangeTable {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "analysis_jobs" => Some(Self::AnalysisJobs),
            "embryo_scores" => Some(Self::EmbryoScores),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
}

impl ChangeKind {
    pub fn from_op(op: &str) -> Option<Self> {
        match op {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            _ => None,
        }
    }
}

/// A row change on a watched table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: ChangeTable,
    pub kind: ChangeKind,
    /// Primary key of the changed row.
    pub row_id: DbId,
    /// Key pollers watch by: plate id for jobs, embryo id for scores.
    pub key_id: DbId,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(table: ChangeTable, kind: ChangeKind, row_id: DbId, key_id: DbId) -> Self {
        Self {
            table,
            kind,
            row_id,
            key_id,
            timestamp: Utc::now(),
        }
    }

    /// True when this change concerns `table` and one of `keys`.
    pub fn touches(&self, table: ChangeTable, keys: &[DbId]) -> bool {
        self.table == table && keys.contains(&self.key_id)
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out change bus.
///
/// ```rust
/// use embryoscore_events::bus::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(ChangeEvent::new(ChangeTable::EmbryoScores, ChangeKind::Insert, 1, 7));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: ChangeEvent) {
        // A send error only means there are no receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
