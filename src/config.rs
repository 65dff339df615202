//! Engine and graph configuration.
//!
//! Both structs are plain serde data with defaults, loadable from JSON or
//! (for the engine) from `ARTIFACT_KERNEL_*` environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::canonical::canonical_hash_hex;
use crate::types::NormalizedPath;

/// Environment variable for [`EngineConfig::workers`].
pub const ENV_WORKERS: &str = "ARTIFACT_KERNEL_WORKERS";
/// Environment variable for [`EngineConfig::refresh_stale_in_background`].
pub const ENV_REFRESH_STALE: &str = "ARTIFACT_KERNEL_REFRESH_STALE";
/// Environment variable for [`EngineConfig::collaborator_timeout_ms`].
pub const ENV_TIMEOUT_MS: &str = "ARTIFACT_KERNEL_TIMEOUT_MS";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidVar {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Parse failure.
        reason: String,
    },

    /// JSON input could not be decoded.
    #[error("invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A field is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of worker slots computations run in.
    pub workers: usize,
    /// Whether an outdated stale read schedules a fresh computation.
    pub refresh_stale_in_background: bool,
    /// Default bound for one external collaborator call, in milliseconds.
    pub collaborator_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            refresh_stale_in_background: true,
            collaborator_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Configuration with `workers` slots and other fields at their defaults.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_WORKERS) {
            config.workers = parse_var(ENV_WORKERS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REFRESH_STALE) {
            config.refresh_stale_in_background = parse_bool(ENV_REFRESH_STALE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.collaborator_timeout_ms = parse_var(ENV_TIMEOUT_MS, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Decode from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.collaborator_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "collaborator_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The default collaborator bound.
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    /// Deterministic hash of the configuration.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self).unwrap_or_default()
    }
}

/// Dependency graph configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Path suffix marking a boot (forward declaration) unit.
    pub boot_suffix: String,
    /// Roots of the whole-workspace graph.
    pub roots: Vec<NormalizedPath>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            boot_suffix: "-boot".to_string(),
            roots: Vec::new(),
        }
    }
}

impl GraphConfig {
    /// Configuration with the given workspace roots.
    pub fn with_roots<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<NormalizedPath>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Decode from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.boot_suffix.is_empty() {
            return Err(ConfigError::Invalid("boot_suffix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Deterministic hash of the configuration.
    pub fn params_hash(&self) -> String {
        canonical_hash_hex(self).unwrap_or_default()
    }
}

fn parse_var<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidVar {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar {
            var,
            value: raw.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
