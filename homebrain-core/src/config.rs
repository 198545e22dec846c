//! Pipeline configuration
//!
//! One explicit struct, built once at startup and handed to
//! [`TurnPipeline::compile`](crate::pipeline::TurnPipeline::compile).
//! Values come from defaults, a YAML document, or environment variables
//! (optionally via a `.env` file).

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Error type for configuration loading and validation
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Cannot parse {var}={value:?}: {reason}")]
    Parse {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub const ENV_MIN_CONFIDENCE: &str = "ROUTER_MIN_CONFIDENCE";
pub const ENV_INTERRUPT_ON_AMBIGUITY: &str = "ROUTER_INTERRUPT_ON_AMBIGUITY";
pub const ENV_ROUTER_MAX_ATTEMPTS: &str = "ROUTER_MAX_ATTEMPTS";
pub const ENV_ROUTER_RETRY_DELAY_MS: &str = "ROUTER_RETRY_DELAY_MS";
pub const ENV_SPECIALIST_MAX_ATTEMPTS: &str = "SPECIALIST_MAX_ATTEMPTS";

// ─── Retry policy ─────────────────────────────────────────────

/// Retry policy attached to a pipeline stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_interval_ms: u64,
    /// Multiplier applied to the delay for each further attempt.
    pub backoff_factor: f64,
    /// Per-attempt timeout. A timed-out attempt counts as a failure.
    pub attempt_timeout_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_retry()
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval_ms: 0,
            backoff_factor: 1.0,
            attempt_timeout_ms: None,
        }
    }

    /// Two attempts, 500ms apart.
    pub fn router_default() -> Self {
        Self {
            max_attempts: 2,
            initial_interval_ms: 500,
            backoff_factor: 2.0,
            attempt_timeout_ms: None,
        }
    }

    /// Delay to wait before `attempt` (1-based). The first attempt never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2) as i32;
        let ms = self.initial_interval_ms as f64 * self.backoff_factor.powi(exponent);
        Duration::from_millis(ms.round() as u64)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field,
                reason: "max_attempts must be at least 1".to_string(),
            });
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::Invalid {
                field,
                reason: format!("backoff_factor must be >= 0, got {}", self.backoff_factor),
            });
        }
        Ok(())
    }
}

/// A partially specified [`RetryPolicy`]; absent keys keep the base policy's values.
#[derive(Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetryPolicyOverlay {
    max_attempts: Option<u32>,
    initial_interval_ms: Option<u64>,
    backoff_factor: Option<f64>,
    attempt_timeout_ms: Option<u64>,
}

impl RetryPolicyOverlay {
    fn apply(self, base: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(base.max_attempts),
            initial_interval_ms: self.initial_interval_ms.unwrap_or(base.initial_interval_ms),
            backoff_factor: self.backoff_factor.unwrap_or(base.backoff_factor),
            attempt_timeout_ms: self.attempt_timeout_ms.or(base.attempt_timeout_ms),
        }
    }
}

fn classifier_retry<'de, D>(deserializer: D) -> Result<RetryPolicy, D::Error>
where
    D: Deserializer<'de>,
{
    let overlay = RetryPolicyOverlay::deserialize(deserializer)?;
    Ok(overlay.apply(RetryPolicy::router_default()))
}

// ─── Pipeline config ──────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Classifier confidence below this triggers clarification.
    pub min_confidence: f64,
    pub interrupt_on_ambiguity: bool,
    /// Keys left out in YAML keep [`RetryPolicy::router_default`] values.
    #[serde(deserialize_with = "classifier_retry")]
    pub classifier_retry: RetryPolicy,
    pub specialist_retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.55,
            interrupt_on_ambiguity: true,
            classifier_retry: RetryPolicy::router_default(),
            specialist_retry: RetryPolicy::no_retry(),
        }
    }
}

impl PipelineConfig {
    /// Load from process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup(ENV_MIN_CONFIDENCE) {
            cfg.min_confidence = parse_var(ENV_MIN_CONFIDENCE, &v)?;
        }
        if let Some(v) = lookup(ENV_INTERRUPT_ON_AMBIGUITY) {
            cfg.interrupt_on_ambiguity = parse_bool(ENV_INTERRUPT_ON_AMBIGUITY, &v)?;
        }
        if let Some(v) = lookup(ENV_ROUTER_MAX_ATTEMPTS) {
            cfg.classifier_retry.max_attempts = parse_var(ENV_ROUTER_MAX_ATTEMPTS, &v)?;
        }
        if let Some(v) = lookup(ENV_ROUTER_RETRY_DELAY_MS) {
            cfg.classifier_retry.initial_interval_ms = parse_var(ENV_ROUTER_RETRY_DELAY_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_SPECIALIST_MAX_ATTEMPTS) {
            cfg.specialist_retry.max_attempts = parse_var(ENV_SPECIALIST_MAX_ATTEMPTS, &v)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Invalid {
                field: "min_confidence",
                reason: format!("must be within [0, 1], got {}", self.min_confidence),
            });
        }
        self.classifier_retry.validate("classifier_retry")?;
        self.specialist_retry.validate("specialist_retry")?;
        Ok(())
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Parse {
            var,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
