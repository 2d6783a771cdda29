use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub judge_url: String,
    pub judge_auth_token: Option<String>,
    pub judge_batch: bool,
    pub judge_http_timeout_ms: u64,
    pub judge_pool_max_idle: usize,
    pub poll_interval_ms: u64,
    pub evaluation_timeout_ms: u64,
    pub dispatch_max_attempts: u32,
    pub dispatch_backoff_base_ms: u64,
    pub redis_url: String,
    pub problems_path: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            judge_url: lookup("JUDGE_URL")
                .unwrap_or_else(|| "http://localhost:2358".to_string()),
            judge_auth_token: lookup("JUDGE_AUTH_TOKEN").filter(|t| !t.is_empty()),
            judge_batch: parse_var(&lookup, "JUDGE_BATCH").unwrap_or(true),
            judge_http_timeout_ms: parse_var(&lookup, "JUDGE_HTTP_TIMEOUT_MS").unwrap_or(10_000),
            judge_pool_max_idle: parse_var(&lookup, "JUDGE_POOL_MAX_IDLE").unwrap_or(16),
            poll_interval_ms: parse_var(&lookup, "POLL_INTERVAL_MS").unwrap_or(1000),
            evaluation_timeout_ms: parse_var(&lookup, "EVALUATION_TIMEOUT_MS").unwrap_or(30_000),
            dispatch_max_attempts: parse_var(&lookup, "DISPATCH_MAX_ATTEMPTS").unwrap_or(3),
            dispatch_backoff_base_ms: parse_var(&lookup, "DISPATCH_BACKOFF_BASE_MS").unwrap_or(200),
            redis_url: lookup("REDIS_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
            problems_path: lookup("PROBLEMS_PATH")
                .unwrap_or_else(|| "config/problems.json".to_string()),
            port: parse_var(&lookup, "PORT").unwrap_or(3000),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_millis(self.evaluation_timeout_ms)
    }

    pub fn dispatch_backoff_base(&self) -> Duration {
        Duration::from_millis(self.dispatch_backoff_base_ms)
    }

    pub fn judge_http_timeout(&self) -> Duration {
        Duration::from_millis(self.judge_http_timeout_ms)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
