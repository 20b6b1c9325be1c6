//! Audit layer: local copies versus their upstream system of record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::{LayerKind, ValidationIssue, ValidationLayer};
use crate::config::AuditSourceConfig;
use crate::types::Severity;

/// Keyed records from one side of an audit.
pub type Snapshot = BTreeMap<String, Value>;

/// A pair of record sets that should agree.
#[async_trait]
pub trait AuditSource: Send + Sync {
    fn name(&self) -> &str;

    /// Records held locally (cache, replica, denormalized copy)
    async fn local(&self) -> Result<Snapshot>;

    /// Records held by the system of record
    async fn upstream(&self) -> Result<Snapshot>;
}

/// Audit source comparing two JSON object files.
#[derive(Debug, Clone)]
pub struct JsonFileAuditSource {
    name: String,
    local: PathBuf,
    upstream: PathBuf,
}

impl JsonFileAuditSource {
    pub fn new(name: impl Into<String>, local: impl Into<PathBuf>, upstream: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            local: local.into(),
            upstream: upstream.into(),
        }
    }

    #[must_use]
    pub fn from_config(config: &AuditSourceConfig) -> Self {
        Self::new(&config.name, &config.local, &config.upstream)
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON object", path.display()))
}

#[async_trait]
impl AuditSource for JsonFileAuditSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn local(&self) -> Result<Snapshot> {
        read_snapshot(&self.local).await
    }

    async fn upstream(&self) -> Result<Snapshot> {
        read_snapshot(&self.upstream).await
    }
}

/// Compares every registered source.
#[derive(Default)]
pub struct AuditLayer {
    sources: Vec<Arc<dyn AuditSource>>,
}

impl AuditLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_source(mut self, source: impl AuditSource + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// One [`JsonFileAuditSource`] per configured pair.
    #[must_use]
    pub fn from_config(sources: &[AuditSourceConfig]) -> Self {
        sources.iter().fold(Self::new(), |layer, config| {
            layer.with_source(JsonFileAuditSource::from_config(config))
        })
    }

    async fn audit(source: &dyn AuditSource) -> Vec<ValidationIssue> {
        let name = source.name();
        let (local, upstream) = match futures::try_join!(source.local(), source.upstream()) {
            Ok(pair) => pair,
            Err(e) => {
                warn!(source = %name, "Audit source unavailable: {e:#}");
                return vec![ValidationIssue::new(
                    format!("{name}-unavailable"),
                    Severity::Medium,
                    format!("Audit source '{name}' could not be read"),
                    format!("{e:#}"),
                )];
            }
        };

        let mut issues = Vec::new();
        for (key, value) in &local {
            match upstream.get(key) {
                None => issues.push(ValidationIssue::new(
                    format!("{name}-orphan-{key}"),
                    Severity::High,
                    "Local record has no upstream counterpart",
                    format!("'{key}' exists in {name} locally but not upstream"),
                )),
                Some(expected) if expected != value => issues.push(
                    ValidationIssue::new(
                        format!("{name}-mismatch-{key}"),
                        Severity::High,
                        "Local record differs from upstream",
                        format!("'{key}': local {value} vs upstream {expected}"),
                    )
                    .auto_fixable(),
                ),
                Some(_) => {}
            }
        }
        for key in upstream.keys().filter(|k| !local.contains_key(*k)) {
            issues.push(
                ValidationIssue::new(
                    format!("{name}-missing-{key}"),
                    Severity::Medium,
                    "Upstream record is missing locally",
                    format!("'{key}' exists upstream but not in {name}"),
                )
                .auto_fixable(),
            );
        }
        issues
    }
}

#[async_trait]
impl ValidationLayer for AuditLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Audit
    }

    async fn validate(&self) -> Result<Vec<ValidationIssue>> {
        let audits = self.sources.iter().map(|source| Self::audit(source.as_ref()));
        Ok(futures::future::join_all(audits)
            .await
            .into_iter()
            .flatten()
            .collect())
    }
}
