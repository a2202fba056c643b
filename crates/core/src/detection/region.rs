//! Resolution-independent description of one candidate embryo location.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

use super::confidence::DetectionConfidence;
use super::hough::RawCircle;

/// Per-region confidence bucket. `Manual` marks operator-placed regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionConfidence {
    High,
    Medium,
    Low,
    Manual,
}

impl From<DetectionConfidence> for RegionConfidence {
    fn from(value: DetectionConfidence) -> Self {
        match value {
            DetectionConfidence::High => Self::High,
            DetectionConfidence::Medium => Self::Medium,
            DetectionConfidence::Low => Self::Low,
        }
    }
}

/// A detected or manually placed circular region.
///
/// Positions and sizes are percentages of the frame dimensions; `radius_px`
/// stays absolute because the cluster math works in pixels.
/// `detection_count == 0` means the region was placed by an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub center_x_pct: f64,
    pub center_y_pct: f64,
    pub width_pct: f64,
    pub height_pct: f64,
    pub radius_px: f64,
    pub confidence_bucket: RegionConfidence,
    pub detection_count: u32,
}

impl DetectedRegion {
    /// Convert a pixel-space circle into a region on a `frame_width` x
    /// `frame_height` frame.
    pub fn from_circle(
        circle: &RawCircle,
        frame_width: u32,
        frame_height: u32,
        bucket: RegionConfidence,
    ) -> Self {
        let fw = frame_width.max(1) as f64;
        let fh = frame_height.max(1) as f64;
        let diameter = circle.radius * 2.0;
        Self {
            center_x_pct: clamp_pct(circle.x / fw * 100.0),
            center_y_pct: clamp_pct(circle.y / fh * 100.0),
            width_pct: clamp_pct(diameter / fw * 100.0),
            height_pct: clamp_pct(diameter / fh * 100.0),
            radius_px: circle.radius,
            confidence_bucket: bucket,
            detection_count: circle.votes.max(1),
        }
    }

    /// Build an operator-placed region centred on a percentage position.
    pub fn manual(
        center_x_pct: f64,
        center_y_pct: f64,
        radius_px: f64,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let fw = frame_width.max(1) as f64;
        let fh = frame_height.max(1) as f64;
        let diameter = radius_px * 2.0;
        Self {
            center_x_pct: clamp_pct(center_x_pct),
            center_y_pct: clamp_pct(center_y_pct),
            width_pct: clamp_pct(diameter / fw * 100.0),
            height_pct: clamp_pct(diameter / fh * 100.0),
            radius_px,
            confidence_bucket: RegionConfidence::Manual,
            detection_count: 0,
        }
    }

    pub fn is_manual(&self) -> bool {
        self.detection_count == 0
    }

    /// Check the region invariants: percentages in `[0, 100]`, positive radius.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fields = [
            ("center_x_pct", self.center_x_pct),
            ("center_y_pct", self.center_y_pct),
            ("width_pct", self.width_pct),
            ("height_pct", self.height_pct),
        ];
        for (name, value) in fields {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(CoreError::Validation(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }
        if !self.radius_px.is_finite() || self.radius_px <= 0.0 {
            return Err(CoreError::Validation(format!(
                "radius_px must be positive, got {}",
                self.radius_px
            )));
        }
        Ok(())
    }
}

/// Validate every region in a list, reporting the first offending index.
pub fn validate_regions(regions: &[DetectedRegion]) -> Result<(), CoreError> {
    for (i, region) in regions.iter().enumerate() {
        region
            .validate()
            .map_err(|e| CoreError::Validation(format!("region {i}: {e}")))?;
    }
    Ok(())
}

fn clamp_pct(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}
