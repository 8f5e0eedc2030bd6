//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default number of tasks requested per fetch.
pub const DEFAULT_MAX_TASKS: usize = 10;

/// Default lock duration in milliseconds.
pub const DEFAULT_LOCK_DURATION_MS: i64 = 20_000;

/// Client configuration.
///
/// One value per client instance; nothing here is process-global.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Engine REST base URL, without trailing slash.
    pub base_url: String,
    /// Worker id attached to every remote call. Generated when absent.
    pub worker_id: Option<String>,
    /// Maximum tasks fetched per cycle.
    pub max_tasks: usize,
    /// Number of handlers that may run at once (defaults to `max_tasks`).
    pub worker_pool_size: Option<usize>,
    /// Lock duration for subscriptions that don't set their own.
    pub lock_duration_ms: i64,
    /// Pause between poll cycles.
    pub poll_interval: Duration,
    /// Long-polling timeout sent with each fetch, if any.
    pub async_response_timeout: Option<Duration>,
    /// Ask the engine to hand out higher-priority tasks first.
    pub use_priority: bool,
    /// How long `stop()` waits for running handlers.
    pub shutdown_timeout: Option<Duration>,
    /// Start polling as soon as the client is built.
    pub auto_fetching: bool,
    /// Basic auth credentials, if the engine requires them.
    pub username: Option<String>,
    pub password: Option<secrecy::SecretString>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            worker_id: None,
            max_tasks: DEFAULT_MAX_TASKS,
            worker_pool_size: None,
            lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
            poll_interval: Duration::from_millis(500),
            async_response_timeout: None,
            use_priority: true,
            shutdown_timeout: Some(Duration::from_secs(10)),
            auto_fetching: true,
            username: None,
            password: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from `ENGINE_*` environment variables.
    ///
    /// Only `ENGINE_URL` is required; unparsable values fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("ENGINE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("ENGINE_URL".to_string()))?;

        let defaults = Self::default();

        let max_tasks = env_parse("ENGINE_MAX_TASKS").unwrap_or(defaults.max_tasks);
        let lock_duration_ms =
            env_parse("ENGINE_LOCK_DURATION_MS").unwrap_or(defaults.lock_duration_ms);
        let poll_interval = env_parse("ENGINE_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        let async_response_timeout =
            env_parse("ENGINE_ASYNC_RESPONSE_TIMEOUT_MS").map(Duration::from_millis);
        let use_priority = env_parse("ENGINE_USE_PRIORITY").unwrap_or(defaults.use_priority);
        let shutdown_timeout = env_parse("ENGINE_SHUTDOWN_TIMEOUT_MS")
            .map(Duration::from_millis)
            .or(defaults.shutdown_timeout);

        let worker_id = std::env::var("ENGINE_WORKER_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let username = std::env::var("ENGINE_USERNAME").ok().filter(|s| !s.is_empty());
        let password = std::env::var("ENGINE_PASSWORD")
            .ok()
            .map(secrecy::SecretString::from);

        Ok(Self {
            base_url,
            worker_id,
            max_tasks,
            lock_duration_ms,
            poll_interval,
            async_response_timeout,
            use_priority,
            shutdown_timeout,
            username,
            password,
            ..defaults
        })
    }

    /// Effective handler pool size.
    pub fn pool_size(&self) -> usize {
        self.worker_pool_size.unwrap_or(self.max_tasks).max(1)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Strip whitespace and trailing slashes from an endpoint URL and check it parses.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/').trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingBaseUrl);
    }

    let parsed = reqwest::Url::parse(trimmed).map_err(|e| ConfigError::InvalidBaseUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(trimmed.to_string())
}
