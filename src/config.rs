//! Evaluator Configuration
//!
//! Layered configuration for the engine's resource limits and logging,
//! loaded from:
//! - built-in defaults
//! - `vertexeval.toml` (checked into a project, optional)
//! - `vertexeval.local.toml` (git-ignored local overrides)
//! - environment variables (`VERTEXEVAL_` prefix)
//!
//! ## Example
//!
//! ```toml
//! [limits]
//! max_depth = 2000
//! max_disjunction_branches = 4096
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! VERTEXEVAL_LIMITS__MAX_DEPTH=500
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level evaluator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resource limits the scheduler and disjunction engine enforce to turn
/// runaway recursion into an `Incomplete`/`Eval` bottom instead of a stack
/// overflow or unbounded memory growth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum ancestor-chain depth tracked by the cycle tracker's depth
    /// counter (§4.4, §9: "prefer the depth counter as primary").
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Maximum number of overlay vertices a single disjunction expansion may
    /// produce before the engine reports the cross-product as too large
    /// rather than continuing to fork.
    #[serde(default = "default_max_disjunction_branches")]
    pub max_disjunction_branches: usize,

    /// Maximum number of scheduler passes `step()` will run for a single
    /// `needs` request before giving up and reporting incomplete.
    #[serde(default = "default_max_scheduler_passes")]
    pub max_scheduler_passes: usize,

    /// Maximum number of bindings a single comprehension `for` clause may
    /// iterate before the engine aborts expansion.
    #[serde(default = "default_max_comprehension_iterations")]
    pub max_comprehension_iterations: usize,
}

fn default_max_depth() -> usize {
    2000
}
fn default_max_disjunction_branches() -> usize {
    4096
}
fn default_max_scheduler_passes() -> usize {
    100_000
}
fn default_max_comprehension_iterations() -> usize {
    1_000_000
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_depth: default_max_depth(),
            max_disjunction_branches: default_max_disjunction_branches(),
            max_scheduler_passes: default_max_scheduler_passes(),
            max_comprehension_iterations: default_max_comprehension_iterations(),
        }
    }
}

/// Logging configuration consumed by `tracing-subscriber` at process start;
/// the evaluator itself only ever emits `tracing` events, it never installs
/// a subscriber (that is a host-process concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `trace`, `debug`, `info`, `warn`, `error`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig {
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EvaluatorConfig {
    /// Load configuration from the default locations, falling back to
    /// built-in defaults when no file is present.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(
            EvaluatorConfig::default(),
        ))
        .merge(Toml::file("vertexeval.toml"))
        .merge(Toml::file("vertexeval.local.toml"))
        .merge(Env::prefixed("VERTEXEVAL_").split("__"))
        .extract()
    }

    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::from(figment::providers::Serialized::defaults(
            EvaluatorConfig::default(),
        ))
        .merge(Toml::file(path))
        .merge(Env::prefixed("VERTEXEVAL_").split("__"))
        .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_nonzero() {
        let cfg = EvaluatorConfig::default();
        assert!(cfg.limits.max_depth > 0);
        assert!(cfg.limits.max_disjunction_branches > 0);
        assert!(cfg.limits.max_scheduler_passes > 0);
    }

    #[test]
    fn serializes_round_trip_via_toml() {
        let cfg = EvaluatorConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        assert!(text.contains("[limits]"));
        assert!(text.contains("[logging]"));
        let back: EvaluatorConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.limits.max_depth, cfg.limits.max_depth);
    }
}
