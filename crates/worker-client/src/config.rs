use embryoscore_core::config::{env_opt, env_parse, env_required, ConfigError};

/// Worker endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerClientConfig {
    /// Trigger endpoint URL.
    pub url: String,
    /// Optional bearer token sent with every trigger.
    pub token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl WorkerClientConfig {
    /// | Env Var               | Default    |
    /// |-----------------------|------------|
    /// | `WORKER_URL`          | (required) |
    /// | `WORKER_TOKEN`        | none       |
    /// | `WORKER_TIMEOUT_SECS` | `30`       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_required("WORKER_URL")?,
            token: env_opt("WORKER_TOKEN"),
            timeout_secs: env_parse("WORKER_TIMEOUT_SECS", 30)?,
        })
    }
}
