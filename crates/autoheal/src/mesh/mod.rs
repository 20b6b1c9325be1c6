//! Validation mesh.
//!
//! Independent health-check layers run as concurrent tasks. Aggregation only
//! starts once every layer has returned. A layer that errors or panics is
//! reported as a medium issue on that layer and never aborts the others.
//!
//! After the fan-in, every pair of layers is cross-checked: a pair conflicts
//! only when one layer passes while the other fails.

mod audit;
mod runtime;
mod state;
mod static_layer;

pub use audit::{AuditLayer, AuditSource, JsonFileAuditSource, Snapshot};
pub use runtime::{Invariant, RuntimeLayer};
pub use state::StateLayer;
pub use static_layer::StaticLayer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::types::Severity;

/// Weight of the mean layer score in the aggregate confidence.
const LAYER_WEIGHT: f64 = 0.7;
/// Weight of the pairwise agreement fraction.
const AGREEMENT_WEIGHT: f64 = 0.3;

/// One validation dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Static,
    Runtime,
    State,
    Audit,
}

impl LayerKind {
    pub const ALL: [Self; 4] = [Self::Static, Self::Runtime, Self::State, Self::Audit];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Runtime => "runtime",
            Self::State => "state",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "layer",
                value: s.to_string(),
            })
    }
}

/// Verdict of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Pass,
    Warn,
    Fail,
}

impl LayerStatus {
    /// Contribution to the aggregate confidence.
    #[must_use]
    pub fn score(self) -> f64 {
        match self {
            Self::Pass => 1.0,
            Self::Warn => 0.7,
            Self::Fail => 0.3,
        }
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Warn => write!(f, "WARN"),
            Self::Fail => write!(f, "FAIL"),
        }
    }
}

/// A problem found by a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub auto_fixable: bool,
}

impl ValidationIssue {
    pub fn new(
        id: impl Into<String>,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            title: title.into(),
            description: description.into(),
            auto_fixable: false,
        }
    }

    #[must_use]
    pub fn auto_fixable(mut self) -> Self {
        self.auto_fixable = true;
        self
    }
}

/// Outcome of one layer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub layer: LayerKind,
    pub status: LayerStatus,
    pub issues: Vec<ValidationIssue>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// A pluggable health check.
#[async_trait]
pub trait ValidationLayer: Send + Sync {
    fn kind(&self) -> LayerKind;

    /// Whether a high-severity issue fails this layer (critical always does).
    fn fails_on_high(&self) -> bool {
        false
    }

    /// Inspect the system. Returning `Err` marks the layer as crashed.
    async fn validate(&self) -> anyhow::Result<Vec<ValidationIssue>>;
}

/// Derive a layer's status from its issues.
#[must_use]
pub fn status_for(issues: &[ValidationIssue], fails_on_high: bool) -> LayerStatus {
    let fails = issues.iter().any(|i| {
        i.severity == Severity::Critical || (fails_on_high && i.severity == Severity::High)
    });
    if fails {
        LayerStatus::Fail
    } else if issues.is_empty() {
        LayerStatus::Pass
    } else {
        LayerStatus::Warn
    }
}

/// Pairwise agreement between two layers in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub first: LayerKind,
    pub second: LayerKind,
    pub agree: bool,
    pub detail: String,
}

/// Issue totals across every layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub auto_fixable: usize,
}

impl IssueCounts {
    fn tally<'a>(issues: impl IntoIterator<Item = &'a ValidationIssue>) -> Self {
        issues.into_iter().fold(Self::default(), |mut counts, issue| {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
            if issue.auto_fixable {
                counts.auto_fixable += 1;
            }
            counts
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Aggregate verdict of a mesh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshResult {
    pub passed: bool,
    pub confidence: f64,
    pub results: Vec<ValidationResult>,
    pub cross_validations: Vec<CrossValidation>,
    pub issue_counts: IssueCounts,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl MeshResult {
    /// Pairs that disagreed.
    pub fn conflicts(&self) -> impl Iterator<Item = &CrossValidation> {
        self.cross_validations.iter().filter(|c| !c.agree)
    }

    #[must_use]
    pub fn result(&self, kind: LayerKind) -> Option<&ValidationResult> {
        self.results.iter().find(|r| r.layer == kind)
    }
}

/// Runs registered layers concurrently and aggregates their verdicts.
#[derive(Default, Clone)]
pub struct ValidationMesh {
    layers: Vec<Arc<dyn ValidationLayer>>,
}

impl ValidationMesh {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_layer(mut self, layer: impl ValidationLayer + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// Registered layer kinds in registration order.
    pub fn kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(|l| l.kind()).collect()
    }

    /// Run every layer and aggregate.
    pub async fn run_all(&self) -> MeshResult {
        let started = Instant::now();
        info!(layers = self.layers.len(), "Running validation mesh");

        let results =
            futures::future::join_all(self.layers.iter().cloned().map(run_layer_task)).await;

        let result = aggregate(results, elapsed_ms(started));
        info!(
            passed = result.passed,
            confidence = result.confidence,
            issues = result.issue_counts.total(),
            conflicts = result.conflicts().count(),
            "Validation mesh finished"
        );
        result
    }

    /// Run one layer, or `None` if no layer of that kind is registered.
    pub async fn run_layer(&self, kind: LayerKind) -> Option<ValidationResult> {
        let layer = self.layers.iter().find(|l| l.kind() == kind)?.clone();
        Some(run_layer_task(layer).await)
    }
}

/// Run a layer on its own task so a panic is contained.
async fn run_layer_task(layer: Arc<dyn ValidationLayer>) -> ValidationResult {
    let kind = layer.kind();
    let fails_on_high = layer.fails_on_high();
    let started = Instant::now();

    let handle = tokio::spawn(async move { layer.validate().await });
    let issues = match handle.await {
        Ok(Ok(issues)) => issues,
        Ok(Err(e)) => {
            warn!(layer = %kind, "Validation layer failed: {e:#}");
            vec![ValidationIssue::new(
                format!("{kind}-layer-error"),
                Severity::Medium,
                format!("{kind} layer failed to run"),
                format!("{e:#}"),
            )]
        }
        Err(join) => {
            error!(layer = %kind, "Validation layer panicked: {join}");
            vec![ValidationIssue::new(
                format!("{kind}-layer-panic"),
                Severity::Medium,
                format!("{kind} layer crashed"),
                join.to_string(),
            )]
        }
    };

    let status = status_for(&issues, fails_on_high);
    debug!(layer = %kind, status = %status, issues = issues.len(), "Layer finished");

    ValidationResult {
        layer: kind,
        status,
        issues,
        duration_ms: elapsed_ms(started),
        timestamp: Utc::now(),
    }
}

/// Every unordered pair of results, checked for a pass/fail conflict.
#[must_use]
pub fn cross_validate(results: &[ValidationResult]) -> Vec<CrossValidation> {
    let mut pairs = Vec::new();
    for (i, first) in results.iter().enumerate() {
        for second in &results[i + 1..] {
            let conflict = matches!(
                (first.status, second.status),
                (LayerStatus::Pass, LayerStatus::Fail) | (LayerStatus::Fail, LayerStatus::Pass)
            );
            let detail = if conflict {
                format!(
                    "{} reports {} while {} reports {}",
                    first.layer, first.status, second.layer, second.status
                )
            } else {
                format!("{} and {} are consistent", first.layer, second.layer)
            };
            pairs.push(CrossValidation {
                first: first.layer,
                second: second.layer,
                agree: !conflict,
                detail,
            });
        }
    }
    pairs
}

/// Aggregate confidence from layer scores and pairwise agreement.
///
/// An empty set of layers (or pairs) contributes a perfect term.
#[must_use]
pub fn mesh_confidence(results: &[ValidationResult], pairs: &[CrossValidation]) -> f64 {
    let layer_mean = if results.is_empty() {
        1.0
    } else {
        results.iter().map(|r| r.status.score()).sum::<f64>() / results.len() as f64
    };
    let agreement = if pairs.is_empty() {
        1.0
    } else {
        pairs.iter().filter(|p| p.agree).count() as f64 / pairs.len() as f64
    };
    (LAYER_WEIGHT * layer_mean + AGREEMENT_WEIGHT * agreement).min(1.0)
}

fn recommendations(counts: &IssueCounts, conflicts: usize) -> Vec<String> {
    let mut out = Vec::new();
    if counts.critical > 0 {
        out.push(format!(
            "Resolve {} critical issue(s) before relying on this system",
            counts.critical
        ));
    }
    if counts.high > 0 {
        out.push(format!("Investigate {} high-severity issue(s)", counts.high));
    }
    if counts.auto_fixable > 0 {
        out.push(format!("Apply fixes for {} auto-fixable issue(s)", counts.auto_fixable));
    }
    if conflicts > 0 {
        out.push(format!("Review {conflicts} conflicting layer verdict(s)"));
    }
    out
}

fn aggregate(results: Vec<ValidationResult>, duration_ms: u64) -> MeshResult {
    let cross_validations = cross_validate(&results);
    let confidence = mesh_confidence(&results, &cross_validations);
    let issue_counts = IssueCounts::tally(results.iter().flat_map(|r| &r.issues));
    let conflicts = cross_validations.iter().filter(|c| !c.agree).count();
    let passed = issue_counts.critical == 0 && results.iter().all(|r| r.status != LayerStatus::Fail);

    MeshResult {
        passed,
        confidence,
        recommendations: recommendations(&issue_counts, conflicts),
        results,
        cross_validations,
        issue_counts,
        duration_ms,
        timestamp: Utc::now(),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLayer {
        kind: LayerKind,
        issues: Vec<ValidationIssue>,
    }

    #[async_trait]
    impl ValidationLayer for FixedLayer {
        fn kind(&self) -> LayerKind {
            self.kind
        }

        async fn validate(&self) -> anyhow::Result<Vec<ValidationIssue>> {
            Ok(self.issues.clone())
        }
    }

    struct BrokenLayer;

    #[async_trait]
    impl ValidationLayer for BrokenLayer {
        fn kind(&self) -> LayerKind {
            LayerKind::Audit
        }

        async fn validate(&self) -> anyhow::Result<Vec<ValidationIssue>> {
            anyhow::bail!("upstream unreachable")
        }
    }

    struct PanickingLayer;

    #[async_trait]
    impl ValidationLayer for PanickingLayer {
        fn kind(&self) -> LayerKind {
            LayerKind::Runtime
        }

        async fn validate(&self) -> anyhow::Result<Vec<ValidationIssue>> {
            panic!("invariant table corrupted")
        }
    }

    fn passing(kind: LayerKind) -> FixedLayer {
        FixedLayer {
            kind,
            issues: vec![],
        }
    }

    fn issue(severity: Severity) -> ValidationIssue {
        ValidationIssue::new("x", severity, "title", "description")
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(&[], true), LayerStatus::Pass);
        assert_eq!(status_for(&[issue(Severity::Low)], true), LayerStatus::Warn);
        assert_eq!(status_for(&[issue(Severity::High)], true), LayerStatus::Fail);
        assert_eq!(status_for(&[issue(Severity::High)], false), LayerStatus::Warn);
        assert_eq!(status_for(&[issue(Severity::Critical)], false), LayerStatus::Fail);
    }

    #[tokio::test]
    async fn test_all_pass() {
        let mesh = LayerKind::ALL
            .into_iter()
            .fold(ValidationMesh::new(), |mesh, kind| mesh.with_layer(passing(kind)));
        let result = mesh.run_all().await;

        assert!(result.passed);
        assert!((result.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.cross_validations.len(), 6);
        assert_eq!(result.conflicts().count(), 0);
        assert!(result.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_static_critical_conflicts_with_passing_layers() {
        let mesh = ValidationMesh::new()
            .with_layer(FixedLayer {
                kind: LayerKind::Static,
                issues: vec![issue(Severity::Critical)],
            })
            .with_layer(passing(LayerKind::Runtime))
            .with_layer(passing(LayerKind::State))
            .with_layer(passing(LayerKind::Audit));
        let result = mesh.run_all().await;

        assert!(!result.passed);
        let conflicts: Vec<_> = result.conflicts().collect();
        assert_eq!(conflicts.len(), 3);
        assert!(conflicts.iter().all(|c| c.first == LayerKind::Static));
        // 0.7 * (0.3 + 3) / 4 + 0.3 * 3 / 6
        assert!((result.confidence - (0.7 * 3.3 / 4.0 + 0.15)).abs() < 1e-9);
        assert_eq!(result.issue_counts.critical, 1);
        assert!(result.recommendations[0].contains("critical"));
    }

    #[tokio::test]
    async fn test_warn_and_fail_are_not_a_conflict() {
        let mesh = ValidationMesh::new()
            .with_layer(FixedLayer {
                kind: LayerKind::Static,
                issues: vec![issue(Severity::Critical)],
            })
            .with_layer(FixedLayer {
                kind: LayerKind::State,
                issues: vec![issue(Severity::Medium)],
            });
        let result = mesh.run_all().await;
        assert_eq!(result.conflicts().count(), 0);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_layer_errors_are_contained() {
        let mesh = ValidationMesh::new()
            .with_layer(passing(LayerKind::Static))
            .with_layer(BrokenLayer)
            .with_layer(PanickingLayer);
        let result = mesh.run_all().await;

        assert_eq!(result.results.len(), 3);
        let audit = result.result(LayerKind::Audit).unwrap();
        assert_eq!(audit.status, LayerStatus::Warn);
        assert_eq!(audit.issues[0].severity, Severity::Medium);
        assert!(audit.issues[0].description.contains("upstream unreachable"));

        let runtime = result.result(LayerKind::Runtime).unwrap();
        assert_eq!(runtime.status, LayerStatus::Warn);
        assert_eq!(runtime.issues[0].id, "runtime-layer-panic");
        assert!(result.passed);
    }

    #[tokio::test]
    async fn test_run_single_layer() {
        let mesh = ValidationMesh::new().with_layer(FixedLayer {
            kind: LayerKind::State,
            issues: vec![issue(Severity::High)],
        });
        let result = mesh.run_layer(LayerKind::State).await.unwrap();
        assert_eq!(result.status, LayerStatus::Warn);
        assert!(mesh.run_layer(LayerKind::Audit).await.is_none());
    }

    #[test]
    fn test_layer_kind_parse() {
        assert_eq!("Runtime".parse::<LayerKind>().unwrap(), LayerKind::Runtime);
        assert!("network".parse::<LayerKind>().is_err());
    }
}
