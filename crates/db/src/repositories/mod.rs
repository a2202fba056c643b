//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that accept
//! `&PgPool` as the first argument.

pub mod analysis_job_repo;
pub mod embryo_repo;
pub mod embryo_score_repo;

pub use analysis_job_repo::AnalysisJobRepo;
pub use embryo_repo::{EmbryoRepo, PlateRepo};
pub use embryo_score_repo::EmbryoScoreRepo;
