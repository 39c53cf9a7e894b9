//! Configuration loading for host applications that want their default
//! [`crate::policy::RetryPolicy`] driven by a TOML file plus environment
//! overrides, instead of constructing presets in code.
//!
//! Follows the teacher's `figment` + `Toml` + `Env` layering: a file provides
//! the base, environment variables prefixed `DBRETRY_` (nesting on `__`)
//! override individual fields (`DBRETRY_RETRY__MAX_RETRIES=3`, etc.).

pub mod duration_serde;

use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;

/// Deserializable mirror of [`RetryPolicy`] with human-readable durations.
///
/// Exists only at the configuration boundary; call [`RetryPolicyConfig::into_policy`]
/// to get the value type the executor actually consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(with = "duration_serde::duration", default = "default_initial_delay")]
    pub initial_delay: Duration,

    #[serde(with = "duration_serde::duration", default = "default_max_delay")]
    pub max_delay: Duration,

    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}
fn default_initial_delay() -> Duration {
    RetryPolicy::default().initial_delay
}
fn default_max_delay() -> Duration {
    RetryPolicy::default().max_delay
}
fn default_jitter() -> f64 {
    RetryPolicy::default().jitter
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            max_retries: p.max_retries,
            initial_delay: p.initial_delay,
            max_delay: p.max_delay,
            jitter: p.jitter,
        }
    }
}

impl RetryPolicyConfig {
    pub fn into_policy(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

/// Top-level configuration document: `[retry]` table in a TOML file, with
/// `DBRETRY_*` environment variables layered on top.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub retry: RetryPolicyConfig,

    /// Optional overall deadline for the whole `execute` call
    /// (`overall_timeout_s` in spec.md §4.5/§6), so a host application can
    /// configure it alongside the retry policy instead of hardcoding it at
    /// every call site. Absent means no deadline, matching `ExecuteOptions`'s
    /// own default.
    #[serde(default, with = "duration_serde::option_duration")]
    pub overall_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from an optional TOML file plus `DBRETRY_`-prefixed
    /// environment variables. Missing file is not an error — defaults apply.
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("DBRETRY_").split("__"));
        figment.extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_retry_policy_default() {
        let cfg = RetryPolicyConfig::default().into_policy();
        assert_eq!(cfg.max_retries, RetryPolicy::default().max_retries);
        assert_eq!(cfg.initial_delay, RetryPolicy::default().initial_delay);
    }

    #[test]
    fn load_with_no_file_returns_defaults() {
        let cfg = Config::load(None).expect("defaults should always extract");
        assert_eq!(cfg.retry.max_retries, RetryPolicy::default().max_retries);
        assert_eq!(cfg.overall_timeout, None);
    }

    #[test]
    fn overall_timeout_parses_as_human_readable_duration() {
        let cfg: Config = toml::from_str(
            "overall_timeout = \"2s\"\n\n[retry]\nmax_retries = 3\n",
        )
        .unwrap();
        assert_eq!(cfg.overall_timeout, Some(Duration::from_secs(2)));
        assert_eq!(cfg.retry.max_retries, 3);
    }

    #[test]
    fn overall_timeout_absent_from_document_is_none() {
        let cfg: Config = toml::from_str("[retry]\nmax_retries = 1\n").unwrap();
        assert_eq!(cfg.overall_timeout, None);
    }
}
