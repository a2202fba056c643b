use std::time::Duration;

use embryoscore_core::config::{env_parse, ConfigError};

/// Poll intervals for the job watch and the queue aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub job_interval: Duration,
    pub queue_interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            job_interval: Duration::from_secs(5),
            queue_interval: Duration::from_secs(10),
        }
    }
}

impl PollConfig {
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `JOB_POLL_INTERVAL_SECS` | `5`     |
    /// | `QUEUE_REFRESH_SECS`     | `10`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let job_secs: u64 = env_parse("JOB_POLL_INTERVAL_SECS", 5)?;
        let queue_secs: u64 = env_parse("QUEUE_REFRESH_SECS", 10)?;
        Ok(Self {
            job_interval: Duration::from_secs(job_secs.max(1)),
            queue_interval: Duration::from_secs(queue_secs.max(1)),
        })
    }
}
