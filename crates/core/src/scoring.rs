//! Embryo score combination and classification bands.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// Default weight of the morphology sub-score.
pub const DEFAULT_MORPH_WEIGHT: f64 = 0.7;

/// Default weight of the kinetic sub-score.
pub const DEFAULT_KINETIC_WEIGHT: f64 = 0.3;

/// Weights used to combine the two sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub morph: f64,
    pub kinetic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            morph: DEFAULT_MORPH_WEIGHT,
            kinetic: DEFAULT_KINETIC_WEIGHT,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> Result<(), CoreError> {
        let sum = self.morph + self.kinetic;
        if self.morph < 0.0 || self.kinetic < 0.0 || (sum - 1.0).abs() > 1e-6 {
            return Err(CoreError::Validation(format!(
                "score weights must be non-negative and sum to 1, got {} + {}",
                self.morph, self.kinetic
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreClass {
    Excellent,
    Good,
    Fair,
    Borderline,
    NonViable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferRecommendation {
    Priority,
    Recommended,
    Conditional,
    SecondOpinion,
    Discard,
}

impl ScoreClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Borderline => "borderline",
            Self::NonViable => "non_viable",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [Self::Excellent, Self::Good, Self::Fair, Self::Borderline, Self::NonViable]
            .into_iter()
            .find(|c| c.as_str() == name)
    }

    pub fn recommendation(self) -> TransferRecommendation {
        match self {
            Self::Excellent => TransferRecommendation::Priority,
            Self::Good => TransferRecommendation::Recommended,
            Self::Fair => TransferRecommendation::Conditional,
            Self::Borderline => TransferRecommendation::SecondOpinion,
            Self::NonViable => TransferRecommendation::Discard,
        }
    }
}

impl TransferRecommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::Recommended => "recommended",
            Self::Conditional => "conditional",
            Self::SecondOpinion => "second_opinion",
            Self::Discard => "discard",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        [
            Self::Priority,
            Self::Recommended,
            Self::Conditional,
            Self::SecondOpinion,
            Self::Discard,
        ]
        .into_iter()
        .find(|r| r.as_str() == name)
    }
}

/// Band a 0-100 score.
pub fn classify_score(score: i32) -> ScoreClass {
    match score {
        s if s >= 80 => ScoreClass::Excellent,
        s if s >= 60 => ScoreClass::Good,
        s if s >= 40 => ScoreClass::Fair,
        s if s >= 20 => ScoreClass::Borderline,
        _ => ScoreClass::NonViable,
    }
}

/// Combine sub-scores (each clamped to 0-100) into the rounded embryo score.
pub fn combine_scores(morph: f64, kinetic: f64, weights: ScoreWeights) -> i32 {
    let morph = clamp_sub_score(morph);
    let kinetic = clamp_sub_score(kinetic);
    (morph * weights.morph + kinetic * weights.kinetic).round() as i32
}

fn clamp_sub_score(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Score records
// ---------------------------------------------------------------------------

/// Per-embryo result submitted by the worker on completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreInput {
    pub embryo_id: DbId,
    pub morph_score: f64,
    pub kinetic_score: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub model_used: Option<String>,
}

/// A score row ready to be written, with the derived fields filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEmbryoScore {
    pub embryo_id: DbId,
    pub morph_score: f64,
    pub kinetic_score: f64,
    pub embryo_score: i32,
    pub classification: ScoreClass,
    pub recommendation: TransferRecommendation,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub model_used: Option<String>,
}

impl NewEmbryoScore {
    pub fn from_input(input: &ScoreInput, weights: ScoreWeights) -> Self {
        let embryo_score = combine_scores(input.morph_score, input.kinetic_score, weights);
        let classification = classify_score(embryo_score);
        Self {
            embryo_id: input.embryo_id,
            morph_score: clamp_sub_score(input.morph_score),
            kinetic_score: clamp_sub_score(input.kinetic_score),
            embryo_score,
            classification,
            recommendation: classification.recommendation(),
            confidence: input.confidence.map(|c| c.clamp(0.0, 1.0)),
            reasoning: input.reasoning.clone(),
            model_used: input.model_used.clone(),
        }
    }
}

/// A persisted score. At most one row per embryo has `is_current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbryoScore {
    pub id: DbId,
    pub embryo_id: DbId,
    pub job_id: DbId,
    pub morph_score: f64,
    pub kinetic_score: f64,
    pub embryo_score: i32,
    pub classification: ScoreClass,
    pub recommendation: TransferRecommendation,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub model_used: Option<String>,
    pub analysis_version: i32,
    pub is_current: bool,
    pub created_at: Timestamp,
}
