//! Operator-facing health report.

use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::mesh::{IssueCounts, LayerStatus, MeshResult};
use crate::store::Store;
use crate::types::ResolutionOutcome;

/// Layer verdict tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerCounts {
    pub pass: usize,
    pub warn: usize,
    pub fail: usize,
}

/// Capture pipeline totals read from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Stored failure rows
    pub failures: usize,
    /// Rows that matched a rule above the auto-resolve threshold
    pub matched: usize,
    /// Rows whose resolution action ran and succeeded
    pub auto_resolved: usize,
    /// Disabled rules awaiting review
    pub pending_review: usize,
    pub escalations: usize,
}

impl PipelineStats {
    /// Gather totals from the store.
    pub async fn collect(store: &dyn Store) -> StoreResult<Self> {
        let failures = store.list_failures(None).await?;
        let patterns = store.list_patterns().await?;
        let escalations = store.list_escalations().await?;

        Ok(Self {
            failures: failures.len(),
            matched: failures.iter().filter(|f| f.resolution.is_some()).count(),
            auto_resolved: failures
                .iter()
                .filter(|f| f.resolution.as_ref().is_some_and(ResolutionOutcome::resolved))
                .count(),
            pending_review: patterns.iter().filter(|p| !p.enabled).count(),
            escalations: escalations.len(),
        })
    }
}

/// The full report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub passed: bool,
    pub layers: LayerCounts,
    pub issues: IssueCounts,
    #[serde(flatten)]
    pub pipeline: PipelineStats,
    /// Rules learned during this run
    pub new_patterns: usize,
    /// Aggregate mesh confidence as a percentage
    pub confidence_percent: f64,
    pub recommendations: Vec<String>,
    pub duration_ms: u64,
}

impl HealthReport {
    #[must_use]
    pub fn new(mesh: &MeshResult, pipeline: PipelineStats, new_patterns: usize, duration_ms: u64) -> Self {
        let layers = mesh
            .results
            .iter()
            .fold(LayerCounts::default(), |mut counts, r| {
                match r.status {
                    LayerStatus::Pass => counts.pass += 1,
                    LayerStatus::Warn => counts.warn += 1,
                    LayerStatus::Fail => counts.fail += 1,
                }
                counts
            });

        Self {
            passed: mesh.passed,
            layers,
            issues: mesh.issue_counts,
            pipeline,
            new_patterns,
            confidence_percent: (mesh.confidence * 1000.0).round() / 10.0,
            recommendations: mesh.recommendations.clone(),
            duration_ms,
        }
    }

    /// Print a coloured summary to stdout.
    pub fn print_summary(&self) {
        println!();
        println!("{}", "═".repeat(60).bright_black());
        println!("{}", "AUTOHEAL HEALTH REPORT".cyan().bold());
        println!("{}", "═".repeat(60).bright_black());

        println!(
            "  Layers:      {} pass, {} warn, {} fail",
            self.layers.pass.to_string().green(),
            self.layers.warn.to_string().yellow(),
            self.layers.fail.to_string().red()
        );
        println!(
            "  Issues:      {} critical, {} high, {} medium, {} low ({} auto-fixable)",
            self.issues.critical,
            self.issues.high,
            self.issues.medium,
            self.issues.low,
            self.issues.auto_fixable
        );
        println!(
            "  Failures:    {} captured, {} matched, {} auto-resolved",
            self.pipeline.failures, self.pipeline.matched, self.pipeline.auto_resolved
        );
        println!(
            "  Patterns:    {} new, {} pending review",
            self.new_patterns, self.pipeline.pending_review
        );
        println!("  Escalations: {}", self.pipeline.escalations);
        println!("  Confidence:  {:.1}%", self.confidence_percent);
        println!("  Duration:    {}ms", self.duration_ms);

        if !self.recommendations.is_empty() {
            println!();
            for rec in &self.recommendations {
                println!("  {} {rec}", "→".cyan());
            }
        }

        println!("{}", "═".repeat(60).bright_black());
        if self.passed {
            println!("{}", "✓ System healthy".green().bold());
        } else {
            println!("{}", "✗ System needs attention".red().bold());
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::sample_signature;
    use crate::mesh::{LayerKind, ValidationResult};
    use crate::store::MemoryStore;
    use crate::types::{ActionName, ActionOutcome, ErrorCategory, PatternRule, ResolutionAction, ResolutionOutcome};
    use chrono::Utc;
    use uuid::Uuid;

    fn result(layer: LayerKind, status: LayerStatus) -> ValidationResult {
        ValidationResult {
            layer,
            status,
            issues: vec![],
            duration_ms: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_pipeline_stats() {
        let learned = PatternRule::new(
            "learned",
            ErrorCategory::Network,
            ResolutionAction::new(ActionName::RetryOperation, 1_000),
        )
        .disabled();
        let store = MemoryStore::with_patterns(vec![learned]);

        let mut resolved = sample_signature();
        resolved.resolution = Some(ResolutionOutcome {
            rule_id: Uuid::new_v4(),
            action: ActionName::RetryOperation,
            outcome: ActionOutcome::Succeeded {
                detail: String::new(),
            },
            duration_ms: 3,
            executed_at: Utc::now(),
        });
        let mut skipped = sample_signature();
        skipped.resolution = Some(ResolutionOutcome {
            outcome: ActionOutcome::Unregistered,
            ..resolved.resolution.clone().unwrap()
        });
        for failure in [resolved, skipped, sample_signature()] {
            store.insert_failure(&failure).await.unwrap();
        }

        let stats = PipelineStats::collect(&store).await.unwrap();
        assert_eq!(
            stats,
            PipelineStats {
                failures: 3,
                matched: 2,
                auto_resolved: 1,
                pending_review: 1,
                escalations: 0,
            }
        );
    }

    #[test]
    fn test_report_from_mesh() {
        let mesh = MeshResult {
            passed: false,
            confidence: 0.7275,
            results: vec![
                result(LayerKind::Static, LayerStatus::Fail),
                result(LayerKind::Runtime, LayerStatus::Pass),
                result(LayerKind::State, LayerStatus::Warn),
            ],
            cross_validations: vec![],
            issue_counts: IssueCounts::default(),
            recommendations: vec!["Investigate".to_string()],
            duration_ms: 12,
            timestamp: Utc::now(),
        };
        let report = HealthReport::new(&mesh, PipelineStats::default(), 2, 40);

        assert_eq!(
            report.layers,
            LayerCounts {
                pass: 1,
                warn: 1,
                fail: 1
            }
        );
        assert!((report.confidence_percent - 72.8).abs() < 1e-9);
        assert_eq!(report.new_patterns, 2);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pending_review"], 0);
        assert_eq!(json["layers"]["fail"], 1);
    }
}
