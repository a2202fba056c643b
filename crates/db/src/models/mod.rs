//! Domain model structs and DTOs.
//!
//! Row structs mirror the tables; rows with enum or JSON columns are
//! validated into the `embryoscore-core` types at the repository boundary.

pub mod analysis_job;
pub mod embryo;
pub mod embryo_score;
