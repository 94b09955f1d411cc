//! Submission queue configuration.

use std::time::Duration;

/// Tunables for the submission queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionQueueConfig {
    /// Hard execution timeout handed to the job runner
    pub job_timeout: Duration,
    /// Records younger than this get a realtime alert instead of a persisted one
    pub realtime_window: Duration,
    /// Retention used by `clear_old_records`
    pub retention_days: u32,
}

impl Default for SubmissionQueueConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(600),
            realtime_window: Duration::from_secs(60),
            retention_days: 30,
        }
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

pub const ENV_JOB_TIMEOUT_SECS: &str = "DOCFLOW_SUBMISSION_TIMEOUT_SECS";
pub const ENV_REALTIME_WINDOW_SECS: &str = "DOCFLOW_REALTIME_WINDOW_SECS";
pub const ENV_RETENTION_DAYS: &str = "DOCFLOW_SUBMISSION_RETENTION_DAYS";

impl SubmissionQueueConfig {
    /// Load from the process environment; unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let job_timeout = match parse_u64(&lookup, ENV_JOB_TIMEOUT_SECS)? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.job_timeout,
        };
        let realtime_window = match parse_u64(&lookup, ENV_REALTIME_WINDOW_SECS)? {
            Some(secs) => Duration::from_secs(secs),
            None => defaults.realtime_window,
        };
        let retention_days = match parse_u64(&lookup, ENV_RETENTION_DAYS)? {
            Some(days) => u32::try_from(days).map_err(|_| ConfigError::Invalid {
                key: ENV_RETENTION_DAYS,
                value: days.to_string(),
            })?,
            None => defaults.retention_days,
        };

        if job_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: ENV_JOB_TIMEOUT_SECS,
                value: "0".to_string(),
            });
        }

        Ok(Self {
            job_timeout,
            realtime_window,
            retention_days,
        })
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_realtime_window(mut self, window: Duration) -> Self {
        self.realtime_window = window;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}
