//! Engine configuration and the component-fetch retry policy.
//!
//! Settings are read from `KEEL_*` environment variables; unset or unparsable values
//! fall back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_SYSTEM_NAMESPACE;

/// Exponential backoff for component fetches that may race eventual consistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Default::default() }
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry `attempt` (1-based; attempt 0 is the initial try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Trusted namespace searched first for definitions and permissions.
    pub system_namespace: String,
    pub fetch_retry: RetryPolicy,
    /// Run the definition permission pass on applications.
    pub validate_permissions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
            fetch_retry: RetryPolicy::default(),
            validate_permissions: true,
        }
    }
}

/// Boolean switch spellings: `y`/`yes`/`t`/`true`/`on`/`1` and their negations.
pub fn parse_flag(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Some(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Some(false),
        _ => None,
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |k: &str| get(k).and_then(|s| s.trim().parse::<u64>().ok());
        let system_namespace = get("KEEL_SYSTEM_NAMESPACE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(d.system_namespace);
        let mut fetch_retry = d.fetch_retry;
        if let Some(n) = num("KEEL_FETCH_MAX_RETRIES") {
            fetch_retry.max_retries = u32::try_from(n).unwrap_or(u32::MAX);
        }
        if let Some(ms) = num("KEEL_FETCH_BACKOFF_MS") {
            fetch_retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = num("KEEL_FETCH_BACKOFF_MAX_MS") {
            fetch_retry.max_delay = Duration::from_millis(ms);
        }
        let validate_permissions =
            get("KEEL_VALIDATE_PERMISSIONS").and_then(|v| parse_flag(&v)).unwrap_or(d.validate_permissions);
        Self { system_namespace, fetch_retry, validate_permissions }
    }
}
