use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// A configuration variable was present but unusable.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value for {var}: {value:?} ({reason})")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Parse variable `var` from `lookup`, falling back to `default` when unset.
pub fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(e) => Err(ConfigError {
                var,
                reason: e.to_string(),
                value,
            }),
        },
    }
}

/// Longest accepted `JOB_RETENTION_DAYS` (one hundred years).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Job execution settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs executing at once (default: `4`).
    pub max_concurrent_jobs: usize,
    /// Jobs allowed to wait for a worker; `None` means unbounded.
    pub max_queued_jobs: Option<usize>,
    /// Per-step time limit (default: 120s).
    pub step_timeout: Option<Duration>,
    /// Attempts at persisting a terminal state before giving up (default: `3`).
    pub terminal_save_attempts: u32,
    /// Base delay between terminal save attempts; attempt `n` waits `n` times this.
    pub terminal_save_backoff: Duration,
    /// Terminal jobs older than this are deleted (default: 30 days).
    pub retention: chrono::Duration,
    /// How often retention cleanup runs (default: 1 hour).
    pub retention_interval: Duration,
    /// Base URL of the transformation service.
    pub transform_service_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            max_queued_jobs: None,
            step_timeout: Some(Duration::from_secs(120)),
            terminal_save_attempts: 3,
            terminal_save_backoff: Duration::from_millis(200),
            retention: chrono::Duration::days(30),
            retention_interval: Duration::from_secs(3600),
            transform_service_url: "http://localhost:8100".into(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `MAX_CONCURRENT_JOBS`     | `4`                      |
    /// | `MAX_QUEUED_JOBS`         | unbounded                |
    /// | `STEP_TIMEOUT_SECS`       | `120` (`0` disables)     |
    /// | `TERMINAL_SAVE_ATTEMPTS`  | `3`                      |
    /// | `JOB_RETENTION_DAYS`      | `30`                     |
    /// | `RETENTION_INTERVAL_SECS` | `3600`                   |
    /// | `TRANSFORM_SERVICE_URL`   | `http://localhost:8100`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_concurrent_jobs: usize = parse_var(&lookup, "MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?;
        if max_concurrent_jobs == 0 {
            return Err(ConfigError {
                var: "MAX_CONCURRENT_JOBS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let max_queued_jobs = match lookup("MAX_QUEUED_JOBS") {
            None => None,
            Some(_) => Some(parse_var(&lookup, "MAX_QUEUED_JOBS", 0usize)?),
        };

        let step_timeout_secs: u64 = parse_var(&lookup, "STEP_TIMEOUT_SECS", 120)?;
        let terminal_save_attempts: u32 =
            parse_var(&lookup, "TERMINAL_SAVE_ATTEMPTS", defaults.terminal_save_attempts)?;
        let retention_days: i64 = parse_var(&lookup, "JOB_RETENTION_DAYS", 30)?;
        let retention = (0..=MAX_RETENTION_DAYS)
            .contains(&retention_days)
            .then(|| chrono::Duration::try_days(retention_days))
            .flatten()
            .ok_or_else(|| ConfigError {
                var: "JOB_RETENTION_DAYS",
                value: retention_days.to_string(),
                reason: format!("must be between 0 and {MAX_RETENTION_DAYS}"),
            })?;
        let retention_interval_secs: u64 = parse_var(&lookup, "RETENTION_INTERVAL_SECS", 3600)?;
        let transform_service_url = lookup("TRANSFORM_SERVICE_URL")
            .map(|v| v.trim().to_string())
            .unwrap_or(defaults.transform_service_url);

        Ok(Self {
            max_concurrent_jobs,
            max_queued_jobs,
            step_timeout: (step_timeout_secs > 0).then(|| Duration::from_secs(step_timeout_secs)),
            terminal_save_attempts: terminal_save_attempts.max(1),
            terminal_save_backoff: defaults.terminal_save_backoff,
            retention,
            retention_interval: Duration::from_secs(retention_interval_secs.max(1)),
            transform_service_url,
        })
    }
}
