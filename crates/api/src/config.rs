use axum::http::HeaderValue;
use embryoscore_core::config::{env_opt, env_parse, ConfigError};
use embryoscore_pipeline::PollConfig;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines (development).
    #[default]
    Pretty,
    /// One JSON object per line (log shippers).
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long background services get to stop after the server drains.
    pub shutdown_timeout_secs: u64,
    pub log_format: LogFormat,
    pub poll: PollConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `10`                    |
    /// | `LOG_FORMAT`            | `pretty`                |
    ///
    /// Poll intervals come from [`PollConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_opt("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", 3000)?;

        let cors_origins = split_origins(
            &env_opt("CORS_ORIGINS").unwrap_or_else(|| "http://localhost:5173".into()),
        );
        check_origins(&cors_origins)?;

        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", 30)?;
        let shutdown_timeout_secs: u64 = env_parse("SHUTDOWN_TIMEOUT_SECS", 10)?;

        let log_format = env_parse("LOG_FORMAT", LogFormat::default())?;

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            log_format,
            poll: PollConfig::from_env()?,
        })
    }

    /// Longest a wait request may block, kept under the request timeout.
    pub fn max_wait_secs(&self) -> u64 {
        self.request_timeout_secs.saturating_sub(1).max(1)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Every origin must be `*` or a valid header value.
fn check_origins(origins: &[String]) -> Result<(), ConfigError> {
    match origins
        .iter()
        .find(|o| o.as_str() != "*" && o.parse::<HeaderValue>().is_err())
    {
        Some(bad) => Err(ConfigError::Invalid {
            var: "CORS_ORIGINS",
            value: bad.clone(),
        }),
        None => Ok(()),
    }
}
