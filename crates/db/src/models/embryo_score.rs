//! Embryo score rows.

use embryoscore_core::error::CoreError;
use embryoscore_core::scoring::{EmbryoScore, ScoreClass, TransferRecommendation};
use embryoscore_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A raw row from the `embryo_scores` table.
#[derive(Debug, Clone, FromRow)]
pub struct EmbryoScoreRow {
    pub id: DbId,
    pub embryo_id: DbId,
    pub job_id: DbId,
    pub morph_score: f64,
    pub kinetic_score: f64,
    pub embryo_score: i32,
    pub classification: String,
    pub recommendation: String,
    pub confidence: Option<f64>,
    pub reasoning: Option<String>,
    pub model_used: Option<String>,
    pub analysis_version: i32,
    pub is_current: bool,
    pub created_at: Timestamp,
}

impl TryFrom<EmbryoScoreRow> for EmbryoScore {
    type Error = CoreError;

    fn try_from(row: EmbryoScoreRow) -> Result<Self, Self::Error> {
        let classification = ScoreClass::parse(&row.classification).ok_or_else(|| {
            CoreError::Validation(format!(
                "score {}: unknown classification '{}'",
                row.id, row.classification
            ))
        })?;
        let recommendation = TransferRecommendation::parse(&row.recommendation).ok_or_else(|| {
            CoreError::Validation(format!(
                "score {}: unknown recommendation '{}'",
                row.id, row.recommendation
            ))
        })?;
        Ok(EmbryoScore {
            id: row.id,
            embryo_id: row.embryo_id,
            job_id: row.job_id,
            morph_score: row.morph_score,
            kinetic_score: row.kinetic_score,
            embryo_score: row.embryo_score,
            classification,
            recommendation,
            confidence: row.confidence,
            reasoning: row.reasoning,
            model_used: row.model_used,
            analysis_version: row.analysis_version,
            is_current: row.is_current,
            created_at: row.created_at,
        })
    }
}

pub fn into_score(row: EmbryoScoreRow) -> Result<EmbryoScore, sqlx::Error> {
    EmbryoScore::try_from(row).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}
