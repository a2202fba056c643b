//! Embryo detection on a plate frame.
//!
//! The pipeline is: two-pass Hough search ([`hough`]) → edge-margin filter →
//! radius-cluster selection ([`cluster`]) → confidence ([`confidence`]) →
//! region conversion ([`region`]) and crops ([`crop`]). Everything here is
//! synchronous; [`Detector::detect`] moves the work onto the blocking pool.

pub mod cluster;
pub mod confidence;
pub mod crop;
pub mod hough;
pub mod region;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::frame::{FrameError, FrameSource};

pub use cluster::{select_by_radius_cluster, ClusterSelection};
pub use confidence::{classify_confidence, DetectionConfidence};
pub use crop::{extract_crops, CropSettings, RegionCrop};
pub use hough::RawCircle;
pub use region::{validate_regions, DetectedRegion, RegionConfidence};

/// Default cap on regions returned by one detection run.
pub const DEFAULT_MAX_REGIONS: usize = 20;

/// Detection errors. Finding nothing is not an error.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("detection backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Tunables for the detection run. Fractions are of the shorter frame side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub max_regions: usize,
    pub first_pass_sensitivity: u32,
    pub second_pass_sensitivity: u32,
    pub min_radius_frac: f64,
    pub max_radius_frac: f64,
    pub min_center_distance_frac: f64,
    pub edge_margin_frac: f64,
    pub blur_sigma: f32,
    pub canny_high: f32,
    pub cell_size: f64,
    pub crop_padding: f64,
    pub crop_max_side: u32,
    pub jpeg_quality: u8,
    pub frame_position: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_regions: DEFAULT_MAX_REGIONS,
            first_pass_sensitivity: 35,
            second_pass_sensitivity: 25,
            min_radius_frac: 0.04,
            max_radius_frac: 0.25,
            min_center_distance_frac: 0.10,
            edge_margin_frac: 0.04,
            blur_sigma: 1.5,
            canny_high: 100.0,
            cell_size: 1.5,
            crop_padding: 0.20,
            crop_max_side: 400,
            jpeg_quality: 85,
            frame_position: crate::frame::DEFAULT_FRAME_POSITION,
        }
    }
}

impl DetectionConfig {
    pub fn crop_settings(&self) -> CropSettings {
        CropSettings {
            padding: self.crop_padding,
            max_side: self.crop_max_side,
            jpeg_quality: self.jpeg_quality,
        }
    }

    fn check(&self) -> Result<(), DetectionError> {
        let ok = self.first_pass_sensitivity > 0
            && self.second_pass_sensitivity > 0
            && self.min_radius_frac > 0.0
            && self.max_radius_frac > self.min_radius_frac
            && self.edge_margin_frac >= 0.0
            && self.cell_size >= 1.0
            && self.canny_high > 0.0
            && (1..=100).contains(&self.jpeg_quality);
        if ok {
            Ok(())
        } else {
            Err(DetectionError::BackendUnavailable(format!(
                "invalid detection configuration: {self:?}"
            )))
        }
    }
}

/// Output of the search and selection stages, before crops.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleSearch {
    /// Accepted circles, at most the selection target.
    pub circles: Vec<RawCircle>,
    /// Edge-filtered candidates of the pass that was kept.
    pub total_circles_found: usize,
    pub discarded: usize,
}

/// Complete result of detecting one plate frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateDetection {
    pub regions: Vec<DetectedRegion>,
    #[serde(skip)]
    pub crops: Vec<RegionCrop>,
    pub confidence: DetectionConfidence,
    pub frame_width: u32,
    pub frame_height: u32,
    pub total_circles_found: usize,
    pub discarded: usize,
}

/// Number of regions to keep: `min(max_regions, expected)` when an
/// expectation exists, otherwise `max_regions`.
pub fn selection_target(max_regions: usize, expected_count: Option<u32>) -> usize {
    match expected_count.filter(|&n| n > 0) {
        Some(expected) => max_regions.min(expected as usize),
        None => max_regions,
    }
}

/// Build the final detection from accepted circles.
pub fn assemble_detection(
    frame: &RgbImage,
    search: CircleSearch,
    expected_count: Option<u32>,
    crop_settings: &CropSettings,
) -> PlateDetection {
    let (fw, fh) = frame.dimensions();
    let confidence = classify_confidence(search.circles.len(), expected_count);
    let bucket = RegionConfidence::from(confidence);
    let regions: Vec<DetectedRegion> = search
        .circles
        .iter()
        .map(|c| DetectedRegion::from_circle(c, fw, fh, bucket))
        .collect();
    let crops = extract_crops(frame, &regions, crop_settings);

    PlateDetection {
        regions,
        crops,
        confidence,
        frame_width: fw,
        frame_height: fh,
        total_circles_found: search.total_circles_found,
        discarded: search.discarded,
    }
}

// ---------------------------------------------------------------------------
// Detector handle
// ---------------------------------------------------------------------------

static SHARED: OnceCell<Detector> = OnceCell::const_new();

/// Owned detection backend. Cheap to share by reference.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectionConfig,
}

impl Detector {
    pub fn new(config: DetectionConfig) -> Result<Self, DetectionError> {
        config.check()?;
        Ok(Self { config })
    }

    /// Process-wide detector with the default configuration. Concurrent
    /// first callers await the same initialisation.
    pub async fn shared() -> Result<&'static Detector, DetectionError> {
        SHARED
            .get_or_try_init(|| async {
                let detector = Detector::new(DetectionConfig::default())?;
                tracing::info!("Detection backend initialised");
                Ok(detector)
            })
            .await
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Two-pass search plus cluster selection, synchronously.
    pub fn search(&self, frame: &RgbImage, max_regions: usize, expected_count: Option<u32>) -> CircleSearch {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return CircleSearch {
                circles: Vec::new(),
                total_circles_found: 0,
                discarded: 0,
            };
        }
        let cfg = &self.config;
        let margin = w.min(h) as f64 * cfg.edge_margin_frac;
        let gray = hough::preprocess(frame, cfg.blur_sigma);
        let expected = expected_count.filter(|&n| n > 0).map(|n| n as usize);

        let first = hough::find_circles(
            &gray,
            &hough::HoughParams::for_frame(cfg, w, h, cfg.first_pass_sensitivity),
        );
        let mut candidates = hough::filter_edge_margin(first, w, h, margin);
        tracing::debug!(pass = 1, candidates = candidates.len(), "Hough pass complete");

        if let Some(expected) = expected {
            if candidates.len() < expected {
                let second = hough::find_circles(
                    &gray,
                    &hough::HoughParams::for_frame(cfg, w, h, cfg.second_pass_sensitivity),
                );
                let second = hough::filter_edge_margin(second, w, h, margin);
                tracing::debug!(pass = 2, candidates = second.len(), "Hough pass complete");
                if second.len() > candidates.len() {
                    candidates = second;
                }
            }
        }

        let total = candidates.len();
        let target = selection_target(max_regions, expected_count);
        let selection = select_by_radius_cluster(&candidates, target);
        CircleSearch {
            circles: selection.selected,
            total_circles_found: total,
            discarded: selection.discarded,
        }
    }

    /// Detect regions on a decoded frame. Runs on the blocking pool.
    pub async fn detect(
        &self,
        frame: RgbImage,
        max_regions: usize,
        expected_count: Option<u32>,
    ) -> Result<PlateDetection, DetectionError> {
        let this = self.clone();
        let detection = tokio::task::spawn_blocking(move || {
            let search = this.search(&frame, max_regions, expected_count);
            assemble_detection(&frame, search, expected_count, &this.config.crop_settings())
        })
        .await
        .map_err(|e| DetectionError::BackendUnavailable(e.to_string()))?;

        tracing::info!(
            regions = detection.regions.len(),
            total_circles_found = detection.total_circles_found,
            discarded = detection.discarded,
            confidence = detection.confidence.as_str(),
            "Plate detection complete",
        );
        Ok(detection)
    }

    /// Pull the representative frame from `media_ref` and detect on it.
    pub async fn detect_media(
        &self,
        source: &dyn FrameSource,
        media_ref: &str,
        expected_count: Option<u32>,
    ) -> Result<PlateDetection, DetectionError> {
        let frame = source.extract(media_ref, self.config.frame_position).await?;
        self.detect(frame, self.config.max_regions, expected_count).await
    }
}
