//! Runtime configuration.
//!
//! Loaded from a JSON file (missing file means defaults), then overridden
//! from the environment:
//! - `AUTOHEAL_STORE_PATH`: store document path
//! - `AUTOHEAL_AUTO_RESOLVE_THRESHOLD`: minimum match score for auto-resolution
//! - `AUTOHEAL_REQUIRED_ENV`: comma-separated env var names the static layer requires

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ConfigError;
use crate::types::ActionName;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutohealConfig {
    pub store: StoreConfig,
    pub capture: CaptureConfig,
    pub matcher: MatcherConfig,
    pub learner: LearnerConfig,
    /// External commands backing each remediation action
    pub actions: BTreeMap<ActionName, CommandSpec>,
    pub mesh: MeshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".autoheal/store.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Minimum match score before a resolution runs automatically
    pub auto_resolve_threshold: f64,
    /// Write an escalation row for critical failures that were not auto-resolved
    pub escalate_critical: bool,
    /// Env var name prefixes recorded in the system snapshot (empty records all names)
    pub env_key_prefixes: Vec<String>,
    /// Payload/header keys containing any of these markers are redacted
    pub sensitive_keys: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            auto_resolve_threshold: 0.8,
            escalate_critical: true,
            env_key_prefixes: Vec::new(),
            sensitive_keys: [
                "password",
                "token",
                "secret",
                "authorization",
                "cookie",
                "api_key",
                "apikey",
                "card",
                "cvv",
                "ssn",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Scores below this are discarded
    pub min_score: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { min_score: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub min_cluster_size: usize,
    /// Timeout given to the action of a learned rule
    pub action_timeout_ms: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 3,
            action_timeout_ms: 30_000,
        }
    }
}

/// External command run for a remediation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Env vars whose absence is a critical static issue
    pub required_env: Vec<String>,
    /// Maximum used/total memory ratio before the runtime invariant fails
    pub memory_headroom: f64,
    pub audit_sources: Vec<AuditSourceConfig>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            required_env: Vec::new(),
            memory_headroom: 0.95,
            audit_sources: Vec::new(),
        }
    }
}

/// Pair of JSON object files compared by the audit layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSourceConfig {
    pub name: String,
    /// Local cache snapshot
    pub local: PathBuf,
    /// Upstream system-of-record snapshot
    pub upstream: PathBuf,
}

impl AutohealConfig {
    /// Load configuration from `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a config file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Apply `AUTOHEAL_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("AUTOHEAL_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(raw) = env::var("AUTOHEAL_AUTO_RESOLVE_THRESHOLD") {
            self.capture.auto_resolve_threshold =
                raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "AUTOHEAL_AUTO_RESOLVE_THRESHOLD".to_string(),
                    reason: format!("'{raw}' is not a number"),
                })?;
        }
        if let Ok(raw) = env::var("AUTOHEAL_REQUIRED_ENV") {
            self.mesh.required_env = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        Ok(())
    }

    /// Every invalid value in the configuration.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();
        let mut unit_range = |key: &str, value: f64| {
            if !(0.0..=1.0).contains(&value) {
                problems.push(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("{value} is outside [0, 1]"),
                });
            }
        };
        unit_range("capture.auto_resolve_threshold", self.capture.auto_resolve_threshold);
        unit_range("matcher.min_score", self.matcher.min_score);
        unit_range("mesh.memory_headroom", self.mesh.memory_headroom);

        if self.learner.min_cluster_size < 2 {
            problems.push(ConfigError::InvalidValue {
                key: "learner.min_cluster_size".to_string(),
                reason: "a cluster needs at least 2 failures".to_string(),
            });
        }
        if self.learner.action_timeout_ms == 0 {
            problems.push(ConfigError::InvalidValue {
                key: "learner.action_timeout_ms".to_string(),
                reason: "timeout must be positive".to_string(),
            });
        }
        for (action, spec) in &self.actions {
            if spec.program.trim().is_empty() {
                problems.push(ConfigError::InvalidValue {
                    key: format!("actions.{action}.program"),
                    reason: "program is empty".to_string(),
                });
            }
        }
        problems
    }
}
