//! Detection for a stored job: pull the frame, find the regions, keep them
//! on the job as `detected_bboxes`.

use std::sync::Arc;

use embryoscore_core::detection::{Detector, PlateDetection};
use embryoscore_core::frame::FrameSource;
use embryoscore_core::types::DbId;

use crate::error::PipelineError;
use crate::store::JobStore;

#[derive(Clone)]
pub struct DetectionService {
    store: Arc<dyn JobStore>,
    source: Arc<dyn FrameSource>,
    detector: &'static Detector,
}

impl DetectionService {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn FrameSource>,
        detector: &'static Detector,
    ) -> Self {
        Self {
            store,
            source,
            detector,
        }
    }

    /// Run detection on the job's media. A frame or backend failure leaves
    /// the job untouched.
    pub async fn detect_job(&self, job_id: DbId) -> Result<PlateDetection, PipelineError> {
        let job = self.store.get(job_id).await?;
        let detection = self
            .detector
            .detect_media(self.source.as_ref(), &job.media_ref, job.expectation())
            .await?;
        self.store.set_detected(job_id, &detection.regions).await?;
        tracing::info!(
            job_id,
            regions = detection.regions.len(),
            confidence = detection.confidence.as_str(),
            "Detected regions stored",
        );
        Ok(detection)
    }
}
