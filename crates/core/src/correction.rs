//! Operator correction of detected regions before submission.
//!
//! [`CorrectionState`] is a plain reducer: every operation either applies
//! fully (and records an undo snapshot) or returns an error and leaves the
//! state untouched. A UI only observes it.

use serde::{Deserialize, Serialize};

use crate::detection::DetectedRegion;
use crate::error::CoreError;

/// Default manual radius when no regions exist, as a fraction of the shorter
/// frame side.
pub const DEFAULT_MANUAL_RADIUS_FRAC: f64 = 0.08;

/// Embryo grade labels used by the operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmbryoClass {
    /// Expanded blastocyst.
    #[serde(rename = "BE")]
    Be,
    /// Non-expanded blastocyst.
    #[serde(rename = "BN")]
    Bn,
    /// Collapsed blastocyst.
    #[serde(rename = "BX")]
    Bx,
    /// Blastocyst (full).
    #[serde(rename = "BL")]
    Bl,
    /// Initial blastocyst.
    #[serde(rename = "BI")]
    Bi,
    /// Morula.
    #[serde(rename = "Mo")]
    Mo,
    /// Degenerated.
    #[serde(rename = "Dg")]
    Dg,
}

impl EmbryoClass {
    pub const ALL: [EmbryoClass; 7] = [
        Self::Be,
        Self::Bn,
        Self::Bx,
        Self::Bl,
        Self::Bi,
        Self::Mo,
        Self::Dg,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::Be => "BE",
            Self::Bn => "BN",
            Self::Bx => "BX",
            Self::Bl => "BL",
            Self::Bi => "BI",
            Self::Mo => "Mo",
            Self::Dg => "Dg",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }
}

/// Marked / classified counts for a progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorrectionProgress {
    pub marked: usize,
    pub classified: usize,
}

/// Final operator output for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Becomes the job's `manual_bboxes`.
    pub regions: Vec<DetectedRegion>,
    /// Label per region index; `None` when the operator left it unlabelled.
    pub labels: Vec<Option<EmbryoClass>>,
}

impl Submission {
    /// `(region index, label)` for each classified region.
    pub fn classifications(&self) -> impl Iterator<Item = (usize, EmbryoClass)> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| l.map(|label| (i, label)))
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.labels.len() > self.regions.len() {
            return Err(CoreError::Validation(format!(
                "{} labels for {} regions",
                self.labels.len(),
                self.regions.len()
            )));
        }
        crate::detection::validate_regions(&self.regions)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    regions: Vec<DetectedRegion>,
    labels: Vec<Option<EmbryoClass>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionState {
    frame_width: u32,
    frame_height: u32,
    regions: Vec<DetectedRegion>,
    labels: Vec<Option<EmbryoClass>>,
    add_mode: bool,
    history: Vec<Snapshot>,
}

impl CorrectionState {
    /// Seed the state from detector output on a `frame_width` x
    /// `frame_height` frame.
    pub fn new(regions: Vec<DetectedRegion>, frame_width: u32, frame_height: u32) -> Self {
        let labels = vec![None; regions.len()];
        Self {
            frame_width,
            frame_height,
            regions,
            labels,
            add_mode: false,
            history: Vec::new(),
        }
    }

    pub fn regions(&self) -> &[DetectedRegion] {
        &self.regions
    }

    pub fn labels(&self) -> &[Option<EmbryoClass>] {
        &self.labels
    }

    pub fn add_mode(&self) -> bool {
        self.add_mode
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    /// Drop one region, keeping the relative order of the rest.
    pub fn remove(&mut self, index: usize) -> Result<(), CoreError> {
        self.check_index(index)?;
        self.snapshot();
        self.regions.remove(index);
        self.labels.remove(index);
        Ok(())
    }

    /// Append a manual region centred at the given percentages.
    pub fn add(&mut self, x_pct: f64, y_pct: f64) -> Result<usize, CoreError> {
        check_pct(x_pct, y_pct)?;
        let radius = self.default_radius();
        self.snapshot();
        self.regions.push(DetectedRegion::manual(
            x_pct,
            y_pct,
            radius,
            self.frame_width,
            self.frame_height,
        ));
        self.labels.push(None);
        Ok(self.regions.len() - 1)
    }

    pub fn set_add_mode(&mut self, enabled: bool) {
        self.add_mode = enabled;
    }

    pub fn toggle_add_mode(&mut self) {
        self.add_mode = !self.add_mode;
    }

    /// Pointer input on the frame. In add mode this adds a region and leaves
    /// add mode; otherwise it is ignored. Returns the new region index.
    pub fn pointer(&mut self, x_pct: f64, y_pct: f64) -> Result<Option<usize>, CoreError> {
        if !self.add_mode {
            return Ok(None);
        }
        let index = self.add(x_pct, y_pct)?;
        self.add_mode = false;
        Ok(Some(index))
    }

    pub fn classify(&mut self, index: usize, label: EmbryoClass) -> Result<(), CoreError> {
        self.check_index(index)?;
        self.snapshot();
        self.labels[index] = Some(label);
        Ok(())
    }

    /// Re-centre a region. The region is replaced, not edited in place.
    pub fn move_region(&mut self, index: usize, x_pct: f64, y_pct: f64) -> Result<(), CoreError> {
        self.check_index(index)?;
        check_pct(x_pct, y_pct)?;
        self.snapshot();
        let moved = DetectedRegion {
            center_x_pct: x_pct,
            center_y_pct: y_pct,
            ..self.regions[index].clone()
        };
        self.regions[index] = moved;
        Ok(())
    }

    /// Restore the previous snapshot. Returns `false` when there is none.
    pub fn undo(&mut self) -> bool {
        match self.history.pop() {
            Some(snapshot) => {
                self.regions = snapshot.regions;
                self.labels = snapshot.labels;
                true
            }
            None => false,
        }
    }

    pub fn progress(&self) -> CorrectionProgress {
        CorrectionProgress {
            marked: self.regions.len(),
            classified: self.labels.iter().filter(|l| l.is_some()).count(),
        }
    }

    pub fn into_submission(self) -> Submission {
        Submission {
            regions: self.regions,
            labels: self.labels,
        }
    }

    /// Upper median of the current radii, or a frame-relative default.
    fn default_radius(&self) -> f64 {
        if self.regions.is_empty() {
            let min_dim = self.frame_width.min(self.frame_height).max(1) as f64;
            return min_dim * DEFAULT_MANUAL_RADIUS_FRAC;
        }
        let mut radii: Vec<f64> = self.regions.iter().map(|r| r.radius_px).collect();
        radii.sort_by(f64::total_cmp);
        radii[radii.len() / 2]
    }

    fn check_index(&self, index: usize) -> Result<(), CoreError> {
        if index >= self.regions.len() {
            return Err(CoreError::Validation(format!(
                "region index {index} out of range (have {})",
                self.regions.len()
            )));
        }
        Ok(())
    }

    fn snapshot(&mut self) {
        self.history.push(Snapshot {
            regions: self.regions.clone(),
            labels: self.labels.clone(),
        });
    }
}

fn check_pct(x_pct: f64, y_pct: f64) -> Result<(), CoreError> {
    let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
    if in_range(x_pct) && in_range(y_pct) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "position ({x_pct}, {y_pct}) is outside the frame"
        )))
    }
}
