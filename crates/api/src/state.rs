use std::sync::Arc;

use embryoscore_core::detection::Detector;
use embryoscore_core::frame::FrameSource;
use embryoscore_events::EventBus;
use embryoscore_pipeline::{
    DetectionService, Dispatcher, JobController, JobStore, Poller, QueueAggregator, WorkerWriteBack,
};
use embryoscore_worker_client::WorkerTrigger;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via axum's `State`
/// extractor.
///
/// Every field is cheap to clone; the store and services share `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub controller: JobController,
    pub writeback: WorkerWriteBack,
    pub detection: DetectionService,
    pub aggregator: Arc<QueueAggregator>,
    pub poller: Poller,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wire the pipeline services around one store.
    ///
    /// With a bus, job waits wake on change notifications instead of only
    /// on the poll interval.
    pub fn new(
        store: Arc<dyn JobStore>,
        trigger: Arc<dyn WorkerTrigger>,
        frames: Arc<dyn FrameSource>,
        detector: &'static Detector,
        bus: Option<Arc<EventBus>>,
        config: ServerConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&store), trigger);
        let controller = JobController::new(Arc::clone(&store), dispatcher);
        let poller = Poller::new(Arc::clone(&store), config.poll.job_interval);
        let poller = match bus {
            Some(bus) => poller.with_bus(bus),
            None => poller,
        };

        Self {
            controller,
            writeback: WorkerWriteBack::new(Arc::clone(&store)),
            detection: DetectionService::new(Arc::clone(&store), frames, detector),
            aggregator: Arc::new(QueueAggregator::new(
                Arc::clone(&store),
                config.poll.queue_interval,
            )),
            poller,
            store,
            config: Arc::new(config),
        }
    }
}
