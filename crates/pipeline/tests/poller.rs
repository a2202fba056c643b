//! Poller and aggregator timing, on paused tokio time.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{score, Harness};
use embryoscore_core::analysis_job::JobStatus;
use embryoscore_events::{ChangeEvent, ChangeKind, ChangeTable, EventBus};
use embryoscore_pipeline::{JobStore, PipelineError, Poller, QueueAggregator};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_batch_keeps_polling_until_every_embryo_is_scored() {
    let h = Harness::new();
    let plate = h.plate().await;
    let mut embryos = Vec::new();
    for position in 0..3 {
        embryos.push(h.store.ensure_embryo(plate, position).await.unwrap().id);
    }
    h.completed_job(plate, &embryos[..2]).await;
    let pending = h.processing_job(plate).await;

    let poller = Poller::new(h.store.clone(), Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let watch = {
        let (poller, ids, cancel) = (poller.clone(), embryos.clone(), cancel.clone());
        tokio::spawn(async move { poller.watch_scores(&ids, &cancel).await })
    };

    // Several ticks pass with one embryo still unscored.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!watch.is_finished());

    h.store
        .complete(pending.id, pending.retry_count, &[score(embryos[2])])
        .await
        .unwrap();

    let scores = watch.await.unwrap().unwrap();
    assert_eq!(scores.len(), 3);
    assert!(embryos.iter().all(|id| scores.contains_key(id)));
}

#[tokio::test(start_paused = true)]
async fn test_change_event_triggers_immediate_refetch() {
    let h = Harness::new();
    let plate = h.plate().await;
    let embryo = h.store.ensure_embryo(plate, 0).await.unwrap().id;
    let job = h.processing_job(plate).await;

    let bus = Arc::new(EventBus::default());
    let poller = Poller::new(h.store.clone(), Duration::from_secs(3600)).with_bus(Arc::clone(&bus));
    let cancel = CancellationToken::new();
    let watch = {
        let (poller, cancel) = (poller.clone(), cancel.clone());
        tokio::spawn(async move { poller.watch_scores(&[embryo], &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.store.complete(job.id, job.retry_count, &[score(embryo)]).await.unwrap();
    // An event for another embryo does not wake the watch.
    bus.publish(ChangeEvent::new(ChangeTable::EmbryoScores, ChangeKind::Insert, 1, embryo + 100));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!watch.is_finished());

    bus.publish(ChangeEvent::new(ChangeTable::EmbryoScores, ChangeKind::Insert, 2, embryo));
    let scores = tokio::time::timeout(Duration::from_secs(5), watch)
        .await
        .expect("watch should wake on the change event")
        .unwrap()
        .unwrap();
    assert!(scores.contains_key(&embryo));
}

#[tokio::test(start_paused = true)]
async fn test_watch_job_stops_at_terminal_status() {
    let h = Harness::new();
    let plate = h.plate().await;
    let job = h.processing_job(plate).await;

    let poller = Poller::new(h.store.clone(), Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let watch = {
        let (poller, cancel) = (poller.clone(), cancel.clone());
        tokio::spawn(async move { poller.watch_job(job.id, &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(6)).await;
    h.store.fail(job.id, job.retry_count, "worker crashed").await.unwrap();

    let done = watch.await.unwrap().unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.error_message.as_deref(), Some("worker crashed"));
}

#[tokio::test(start_paused = true)]
async fn test_watch_plates_waits_for_latest_job() {
    let h = Harness::new();
    let a = h.plate().await;
    let b = h.plate().await;
    h.completed_job(a, &[]).await;
    let open = h.job(b).await;

    let poller = Poller::new(h.store.clone(), Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let watch = {
        let (poller, cancel) = (poller.clone(), cancel.clone());
        tokio::spawn(async move { poller.watch_plates(&[a, b], &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(!watch.is_finished());

    h.store.cancel(open.id).await.unwrap();
    let latest = watch.await.unwrap().unwrap();
    assert!(latest[&b].is_cancelled());
    assert_eq!(latest[&a].status, JobStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_watch_returns_cancelled() {
    let h = Harness::new();
    let plate = h.plate().await;
    let job = h.job(plate).await;

    let poller = Poller::new(h.store.clone(), Duration::from_secs(5));
    let cancel = CancellationToken::new();
    let watch = {
        let (poller, cancel) = (poller.clone(), cancel.clone());
        tokio::spawn(async move { poller.watch_job(job.id, &cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(12)).await;
    cancel.cancel();
    assert_matches!(watch.await.unwrap(), Err(PipelineError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_aggregator_publishes_summary_on_interval() {
    let h = Harness::new();
    let plate = h.plate().await;
    let aggregator = Arc::new(QueueAggregator::new(h.store.clone(), Duration::from_secs(10)));
    let cancel = CancellationToken::new();
    let task = {
        let (aggregator, cancel) = (Arc::clone(&aggregator), cancel.clone());
        tokio::spawn(async move { aggregator.run(cancel).await })
    };
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(aggregator.current().is_idle());

    h.job(plate).await;
    h.job(plate).await;
    let running = h.processing_job(plate).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    let summary = aggregator.current();
    assert_eq!(summary.pending, 2);
    assert_eq!(summary.processing, 1);
    assert_eq!(summary.oldest_started_at, running.started_at);
    assert_eq!(summary.latest_expected_count, Some(3));

    cancel.cancel();
    task.await.unwrap();
}
