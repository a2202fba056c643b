//! In-process [`JobStore`] used by tests and local runs without Postgres.
//!
//! Every conditioned write checks its precondition and applies under one
//! lock, so the semantics match the SQL `UPDATE ... WHERE` of the Postgres
//! backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use embryoscore_core::analysis_job::{
    transition, truncate_error_message, AnalysisJob, JobAction, JobStatus, CANCELLED_MESSAGE,
    MAX_RETRY_COUNT,
};
use embryoscore_core::correction::Submission;
use embryoscore_core::detection::DetectedRegion;
use embryoscore_core::scoring::{EmbryoScore, NewEmbryoScore};
use embryoscore_core::sync::latest_per_key;
use embryoscore_core::types::{DbId, Timestamp};
use embryoscore_db::models::analysis_job::CreateAnalysisJob;
use embryoscore_db::models::embryo::{CreatePlate, Embryo, Plate};
use tokio::sync::Mutex;

use super::{explain_miss, label_codes, submission_refused, JobStore, StoreError};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Default)]
struct State {
    plates: BTreeMap<DbId, Plate>,
    embryos: BTreeMap<DbId, Embryo>,
    jobs: BTreeMap<DbId, AnalysisJob>,
    scores: Vec<EmbryoScore>,
    next_id: DbId,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn job_mut(&mut self, id: DbId) -> Result<&mut AnalysisJob, StoreError> {
        self.jobs.get_mut(&id).ok_or(StoreError::job_not_found(id))
    }

    fn upsert_embryo(&mut self, plate_id: DbId, position: i32, label: Option<&str>) -> Embryo {
        let now = Utc::now();
        if let Some(embryo) = self
            .embryos
            .values_mut()
            .find(|e| e.plate_id == plate_id && e.position == position)
        {
            if let Some(label) = label {
                embryo.classification = Some(label.to_string());
                embryo.updated_at = now;
            }
            return embryo.clone();
        }
        let id = self.next_id();
        let embryo = Embryo {
            id,
            plate_id,
            position,
            classification: label.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        self.embryos.insert(id, embryo.clone());
        embryo
    }

    fn supersede(&mut self, job_id: DbId, score: &NewEmbryoScore) -> Result<(), StoreError> {
        if !self.embryos.contains_key(&score.embryo_id) {
            return Err(StoreError::NotFound {
                entity: "Embryo",
                id: score.embryo_id,
            });
        }
        let mut version = 0;
        for existing in self.scores.iter_mut().filter(|s| s.embryo_id == score.embryo_id) {
            existing.is_current = false;
            version = version.max(existing.analysis_version);
        }
        let id = self.next_id();
        self.scores.push(EmbryoScore {
            id,
            embryo_id: score.embryo_id,
            job_id,
            morph_score: score.morph_score,
            kinetic_score: score.kinetic_score,
            embryo_score: score.embryo_score,
            classification: score.classification,
            recommendation: score.recommendation,
            confidence: score.confidence,
            reasoning: score.reasoning.clone(),
            model_used: score.model_used.clone(),
            analysis_version: version + 1,
            is_current: true,
            created_at: Utc::now(),
        });
        Ok(())
    }
}

fn reset_to_pending(job: &mut AnalysisJob) {
    job.status = JobStatus::Pending;
    job.started_at = None;
    job.completed_at = None;
    job.error_message = None;
}

fn oldest_first(jobs: &mut [AnalysisJob]) {
    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

fn newest_first(jobs: &mut [AnalysisJob]) {
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// In-memory job store.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_plate(&self, input: &CreatePlate) -> Result<Plate, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let plate = Plate {
            id: state.next_id(),
            name: input.name.clone(),
            created_at: now,
            updated_at: now,
        };
        state.plates.insert(plate.id, plate.clone());
        Ok(plate)
    }

    async fn embryos(&self, plate_id: DbId) -> Result<Vec<Embryo>, StoreError> {
        let state = self.state.lock().await;
        let mut embryos: Vec<Embryo> = state
            .embryos
            .values()
            .filter(|e| e.plate_id == plate_id)
            .cloned()
            .collect();
        embryos.sort_by_key(|e| e.position);
        Ok(embryos)
    }

    async fn ensure_embryo(&self, plate_id: DbId, position: i32) -> Result<Embryo, StoreError> {
        let mut state = self.state.lock().await;
        if !state.plates.contains_key(&plate_id) {
            return Err(StoreError::NotFound {
                entity: "Plate",
                id: plate_id,
            });
        }
        Ok(state.upsert_embryo(plate_id, position, None))
    }

    async fn create(&self, input: &CreateAnalysisJob) -> Result<AnalysisJob, StoreError> {
        input.validate()?;
        let mut state = self.state.lock().await;
        if !state.plates.contains_key(&input.plate_id) {
            return Err(StoreError::NotFound {
                entity: "Plate",
                id: input.plate_id,
            });
        }
        let job = AnalysisJob {
            id: state.next_id(),
            plate_id: input.plate_id,
            status: JobStatus::Pending,
            media_ref: input.media_ref.clone(),
            expected_count: input.expected_count,
            manual_bboxes: None,
            detected_bboxes: None,
            retry_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: DbId) -> Result<Option<AnalysisJob>, StoreError> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn list(
        &self,
        statuses: Option<&[JobStatus]>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize;
        let offset = offset.unwrap_or(0).max(0) as usize;
        let state = self.state.lock().await;
        let mut jobs: Vec<AnalysisJob> = state
            .jobs
            .values()
            .filter(|j| statuses.map_or(true, |s| s.contains(&j.status)))
            .cloned()
            .collect();
        newest_first(&mut jobs);
        Ok(jobs.into_iter().skip(offset).take(limit).collect())
    }

    async fn latest_for_plates(&self, plate_ids: &[DbId]) -> Result<Vec<AnalysisJob>, StoreError> {
        let mut rows: Vec<AnalysisJob> = {
            let state = self.state.lock().await;
            state
                .jobs
                .values()
                .filter(|j| plate_ids.contains(&j.plate_id))
                .cloned()
                .collect()
        };
        newest_first(&mut rows);
        let mut latest: Vec<AnalysisJob> = latest_per_key(rows, |j| j.plate_id, |j| j.created_at)
            .into_values()
            .collect();
        newest_first(&mut latest);
        Ok(latest)
    }

    async fn jobs_in_status(&self, statuses: &[JobStatus]) -> Result<Vec<AnalysisJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<AnalysisJob> = state
            .jobs
            .values()
            .filter(|j| statuses.contains(&j.status))
            .cloned()
            .collect();
        oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn jobs_created_between(
        &self,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<Vec<AnalysisJob>, StoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<AnalysisJob> = state
            .jobs
            .values()
            .filter(|j| j.created_at >= from && j.created_at < to)
            .cloned()
            .collect();
        oldest_first(&mut jobs);
        Ok(jobs)
    }

    async fn current_scores(&self, embryo_ids: &[DbId]) -> Result<Vec<EmbryoScore>, StoreError> {
        let state = self.state.lock().await;
        let mut scores: Vec<EmbryoScore> = state
            .scores
            .iter()
            .filter(|s| s.is_current && embryo_ids.contains(&s.embryo_id))
            .cloned()
            .collect();
        scores.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(scores)
    }

    async fn score_history(&self, embryo_id: DbId) -> Result<Vec<EmbryoScore>, StoreError> {
        let state = self.state.lock().await;
        let mut scores: Vec<EmbryoScore> = state
            .scores
            .iter()
            .filter(|s| s.embryo_id == embryo_id)
            .cloned()
            .collect();
        scores.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(scores)
    }

    async fn set_detected(
        &self,
        id: DbId,
        regions: &[DetectedRegion],
    ) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        job.detected_bboxes = Some(regions.to_vec());
        Ok(job.clone())
    }

    async fn submit(&self, id: DbId, submission: &Submission) -> Result<AnalysisJob, StoreError> {
        submission.validate()?;
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Pending {
            return Err(submission_refused(job));
        }
        job.manual_bboxes = Some(submission.regions.clone());
        let job = job.clone();
        for (position, label) in label_codes(submission).into_iter().enumerate() {
            state.upsert_embryo(job.plate_id, position as i32, label);
        }
        Ok(job)
    }

    async fn claim(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Pending || job.retry_count >= MAX_RETRY_COUNT {
            return Err(explain_miss(job, JobAction::Claim));
        }
        job.status = transition(job.status, JobAction::Claim)?;
        job.started_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn complete(
        &self,
        id: DbId,
        attempt: i32,
        scores: &[NewEmbryoScore],
    ) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        {
            let job = state.job_mut(id)?;
            if job.status != JobStatus::Processing || job.retry_count != attempt {
                return Err(explain_miss(job, JobAction::Complete));
            }
        }
        // Check every embryo first so a bad score leaves nothing written.
        if let Some(missing) = scores.iter().find(|s| !state.embryos.contains_key(&s.embryo_id)) {
            return Err(StoreError::NotFound {
                entity: "Embryo",
                id: missing.embryo_id,
            });
        }
        for score in scores {
            state.supersede(id, score)?;
        }
        let job = state.job_mut(id)?;
        job.status = transition(job.status, JobAction::Complete)?;
        job.completed_at = Some(Utc::now());
        job.error_message = None;
        Ok(job.clone())
    }

    async fn fail(&self, id: DbId, attempt: i32, message: &str) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Processing || job.retry_count != attempt {
            return Err(explain_miss(job, JobAction::Fail));
        }
        job.status = transition(job.status, JobAction::Fail)?;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(truncate_error_message(message));
        Ok(job.clone())
    }

    async fn cancel(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        job.status = transition(job.status, JobAction::Cancel)?;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(CANCELLED_MESSAGE.to_string());
        Ok(job.clone())
    }

    async fn cancel_all(&self) -> Result<Vec<AnalysisJob>, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut cancelled = Vec::new();
        for job in state.jobs.values_mut().filter(|j| j.status.is_active()) {
            job.status = transition(job.status, JobAction::Cancel)?;
            job.completed_at = Some(now);
            job.error_message = Some(CANCELLED_MESSAGE.to_string());
            cancelled.push(job.clone());
        }
        Ok(cancelled)
    }

    async fn retry(&self, id: DbId, observed_retry_count: i32) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.retry_count != observed_retry_count {
            return Err(explain_miss(job, JobAction::Retry));
        }
        transition(job.status, JobAction::Retry)?;
        reset_to_pending(job);
        job.retry_count += 1;
        Ok(job.clone())
    }

    async fn reprocess(&self, id: DbId) -> Result<AnalysisJob, StoreError> {
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if job.status != JobStatus::Completed {
            return Err(explain_miss(job, JobAction::Reprocess));
        }
        reset_to_pending(job);
        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use embryoscore_core::correction::EmbryoClass;
    use embryoscore_core::error::CoreError;
    use embryoscore_core::scoring::{ScoreInput, ScoreWeights};

    use super::*;

    async fn store_with_plate() -> (MemoryJobStore, DbId) {
        let store = MemoryJobStore::new();
        let plate = store
            .create_plate(&CreatePlate {
                name: "P1".to_string(),
            })
            .await
            .unwrap();
        (store, plate.id)
    }

    async fn new_job(store: &MemoryJobStore, plate_id: DbId) -> AnalysisJob {
        store
            .create(&CreateAnalysisJob {
                plate_id,
                media_ref: "plate.mp4".to_string(),
                expected_count: Some(2),
            })
            .await
            .unwrap()
    }

    fn score(embryo_id: DbId) -> NewEmbryoScore {
        NewEmbryoScore::from_input(
            &ScoreInput {
                embryo_id,
                morph_score: 80.0,
                kinetic_score: 50.0,
                confidence: None,
                reasoning: None,
                model_used: None,
            },
            ScoreWeights::default(),
        )
    }

    #[tokio::test]
    async fn create_requires_plate() {
        let store = MemoryJobStore::new();
        let err = store
            .create(&CreateAnalysisJob {
                plate_id: 99,
                media_ref: "x.mp4".to_string(),
                expected_count: None,
            })
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "Plate", id: 99 });
    }

    #[tokio::test]
    async fn worker_write_after_cancel_is_stale() {
        let (store, plate) = store_with_plate().await;
        let embryo = store.ensure_embryo(plate, 0).await.unwrap();
        let job = new_job(&store, plate).await;
        let job = store.claim(job.id).await.unwrap();

        store.cancel(job.id).await.unwrap();
        let err = store.complete(job.id, job.retry_count, &[score(embryo.id)]).await.unwrap_err();
        assert_matches!(err, StoreError::Stale(_));
        assert!(store.current_scores(&[embryo.id]).await.unwrap().is_empty());
        assert!(store.get(job.id).await.unwrap().is_cancelled());
    }

    #[tokio::test]
    async fn completion_supersedes_previous_score() {
        let (store, plate) = store_with_plate().await;
        let embryo = store.ensure_embryo(plate, 0).await.unwrap();

        for _ in 0..2 {
            let job = new_job(&store, plate).await;
            let job = store.claim(job.id).await.unwrap();
            store.complete(job.id, job.retry_count, &[score(embryo.id)]).await.unwrap();
        }

        let current = store.current_scores(&[embryo.id]).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].analysis_version, 2);
        assert_eq!(current[0].embryo_score, 71);
        assert_eq!(store.score_history(embryo.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completion_with_unknown_embryo_writes_nothing() {
        let (store, plate) = store_with_plate().await;
        let embryo = store.ensure_embryo(plate, 0).await.unwrap();
        let job = store.claim(new_job(&store, plate).await.id).await.unwrap();

        let err = store
            .complete(job.id, 0, &[score(embryo.id), score(embryo.id + 500)])
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::NotFound { entity: "Embryo", .. });
        assert!(store.current_scores(&[embryo.id]).await.unwrap().is_empty());
        assert_eq!(store.get(job.id).await.unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn submission_labels_embryos_by_position() {
        let (store, plate) = store_with_plate().await;
        let job = new_job(&store, plate).await;
        let submission = Submission {
            regions: vec![
                DetectedRegion::manual(20.0, 20.0, 10.0, 640, 480),
                DetectedRegion::manual(60.0, 20.0, 10.0, 640, 480),
            ],
            labels: vec![None, Some(EmbryoClass::Bx)],
        };

        let updated = store.submit(job.id, &submission).await.unwrap();
        assert_eq!(updated.manual_bboxes.as_ref().map(Vec::len), Some(2));

        let embryos = store.embryos(plate).await.unwrap();
        assert_eq!(embryos.len(), 2);
        assert_eq!(embryos[0].classification, None);
        assert_eq!(embryos[1].classification.as_deref(), Some("BX"));

        store.claim(job.id).await.unwrap();
        let err = store.submit(job.id, &submission).await.unwrap_err();
        assert_matches!(err, StoreError::Invalid(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn latest_for_plates_keeps_newest_job() {
        let (store, plate) = store_with_plate().await;
        let _old = new_job(&store, plate).await;
        let newer = new_job(&store, plate).await;

        let latest = store.latest_for_plates(&[plate]).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, newer.id);
    }
}
