//! Postgres `LISTEN/NOTIFY` bridge into the [`EventBus`].
//!
//! Triggers on `analysis_jobs` and `embryo_scores` notify
//! [`CHANGE_CHANNEL`] with `{"table", "op", "id", "key_id"}`. The listener
//! republishes each payload as a [`ChangeEvent`]. When the connection drops
//! it reconnects with exponential backoff until cancelled; pollers keep
//! working on their timers in the meantime.

use std::sync::Arc;
use std::time::Duration;

use embryoscore_core::types::DbId;
use serde::Deserialize;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::bus::{ChangeEvent, ChangeKind, ChangeTable, EventBus};

/// Notification channel written by the change triggers.
pub const CHANGE_CHANNEL: &str = "embryoscore_changes";

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`.
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

#[derive(Debug, Deserialize)]
struct NotifyPayload {
    table: String,
    op: String,
    id: DbId,
    key_id: DbId,
}

/// Parse a trigger payload. `None` for unknown tables/ops or bad JSON.
pub fn parse_notification(payload: &str) -> Option<ChangeEvent> {
    let raw: NotifyPayload = serde_json::from_str(payload).ok()?;
    Some(ChangeEvent::new(
        ChangeTable::from_name(&raw.table)?,
        ChangeKind::from_op(&raw.op)?,
        raw.id,
        raw.key_id,
    ))
}

enum ListenOutcome {
    Cancelled,
    Lost { connected: bool, error: sqlx::Error },
}

/// Long-running service feeding database changes into the bus.
pub struct ChangeListener {
    pool: PgPool,
    bus: Arc<EventBus>,
    config: ReconnectConfig,
}

impl ChangeListener {
    pub fn new(pool: PgPool, bus: Arc<EventBus>) -> Self {
        Self {
            pool,
            bus,
            config: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect(mut self, config: ReconnectConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut delay = self.config.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.listen(&cancel).await {
                ListenOutcome::Cancelled => {
                    tracing::info!("Change listener stopped");
                    return;
                }
                ListenOutcome::Lost { connected, error } => {
                    if connected {
                        delay = self.config.initial_delay;
                        attempt = 1;
                    }
                    tracing::warn!(
                        error = %error,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Change listener connection lost, reconnecting",
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.config);
        }
    }

    async fn listen(&self, cancel: &CancellationToken) -> ListenOutcome {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(l) => l,
            Err(error) => {
                return ListenOutcome::Lost {
                    connected: false,
                    error,
                }
            }
        };
        if let Err(error) = listener.listen(CHANGE_CHANNEL).await {
            return ListenOutcome::Lost {
                connected: false,
                error,
            };
        }
        tracing::info!(channel = CHANGE_CHANNEL, "Change listener connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ListenOutcome::Cancelled,
                received = listener.recv() => match received {
                    Ok(notification) => match parse_notification(notification.payload()) {
                        Some(event) => self.bus.publish(event),
                        None => tracing::warn!(
                            payload = notification.payload(),
                            "Ignoring unrecognised change notification",
                        ),
                    },
                    Err(error) => return ListenOutcome::Lost { connected: true, error },
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles_and_clamps() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(20), &config), Duration::from_secs(30));
    }

    #[test]
    fn parses_score_insert() {
        let event =
            parse_notification(r#"{"table":"embryo_scores","op":"INSERT","id":12,"key_id":4}"#)
                .unwrap();
        assert_eq!(event.table, ChangeTable::EmbryoScores);
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.row_id, 12);
        assert_eq!(event.key_id, 4);
    }

    #[test]
    fn rejects_unknown_payloads() {
        assert!(parse_notification("not json").is_none());
        assert!(parse_notification(r#"{"table":"plates","op":"INSERT","id":1,"key_id":1}"#).is_none());
        assert!(
            parse_notification(r#"{"table":"analysis_jobs","op":"DELETE","id":1,"key_id":1}"#)
                .is_none()
        );
    }
}
