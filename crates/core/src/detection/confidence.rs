//! Categorical confidence of a detection run, from detected vs expected counts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionConfidence {
    High,
    Medium,
    Low,
}

impl DetectionConfidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Classify a run that accepted `accepted` regions.
///
/// An `expected_count` of zero counts as "no expectation".
pub fn classify_confidence(accepted: usize, expected_count: Option<u32>) -> DetectionConfidence {
    if accepted == 0 {
        return DetectionConfidence::Low;
    }
    match expected_count.filter(|&n| n > 0) {
        Some(expected) if accepted == expected as usize => DetectionConfidence::High,
        Some(expected) if accepted < expected as usize => DetectionConfidence::Low,
        _ => DetectionConfidence::Medium,
    }
}
