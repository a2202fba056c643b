//! The listener republishes trigger notifications on the bus.

use std::sync::Arc;
use std::time::Duration;

use embryoscore_events::{ChangeKind, ChangeListener, ChangeTable, EventBus};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

#[sqlx::test(migrations = "../../db/migrations")]
async fn test_job_insert_reaches_the_bus(pool: PgPool) {
    let (plate_id,): (i64,) = sqlx::query_as("INSERT INTO plates (name) VALUES ('P1') RETURNING id")
        .fetch_one(&pool)
        .await
        .unwrap();

    let bus = Arc::new(EventBus::default());
    let mut rx = bus.subscribe();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(ChangeListener::new(pool.clone(), Arc::clone(&bus)).run(cancel.clone()));

    // LISTEN may not be registered yet; keep inserting until an event arrives.
    let event = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            sqlx::query("INSERT INTO analysis_jobs (plate_id, media_ref) VALUES ($1, 'v.mp4')")
                .bind(plate_id)
                .execute(&pool)
                .await
                .unwrap();
            if let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                return event;
            }
        }
    })
    .await
    .expect("no change event within 10s");

    assert_eq!(event.table, ChangeTable::AnalysisJobs);
    assert_eq!(event.kind, ChangeKind::Insert);
    assert_eq!(event.key_id, plate_id);

    cancel.cancel();
    handle.await.unwrap();
}
