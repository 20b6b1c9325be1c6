//! State layer: consistency of persisted rows.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{LayerKind, ValidationIssue, ValidationLayer};
use crate::store::Store;
use crate::types::{confidence_from, Severity};

/// Tolerance when comparing stored and recomputed confidence.
const CONFIDENCE_TOLERANCE: f64 = 1e-9;

/// Referential-integrity and counter checks over the store.
pub struct StateLayer {
    store: Arc<dyn Store>,
}

impl StateLayer {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ValidationLayer for StateLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::State
    }

    async fn validate(&self) -> Result<Vec<ValidationIssue>> {
        let failures = self.store.list_failures(None).await?;
        let patterns = self.store.list_patterns().await?;
        let logs = self.store.list_resolution_logs().await?;
        let escalations = self.store.list_escalations().await?;

        let mut issues = Vec::new();

        for failure in &failures {
            if failure.first_seen > failure.last_seen || failure.occurrence_count == 0 {
                issues.push(ValidationIssue::new(
                    format!("failure-timeline-{}", failure.id),
                    Severity::High,
                    "Failure row has an impossible timeline",
                    format!(
                        "fingerprint {} first_seen={} last_seen={} occurrences={}",
                        failure.fingerprint,
                        failure.first_seen,
                        failure.last_seen,
                        failure.occurrence_count
                    ),
                ));
            }
        }

        for rule in &patterns {
            if !(0.0..=1.0).contains(&rule.confidence) {
                issues.push(ValidationIssue::new(
                    format!("pattern-confidence-range-{}", rule.id),
                    Severity::Critical,
                    "Pattern confidence is out of range",
                    format!("Rule '{}' has confidence {}", rule.name, rule.confidence),
                ));
                continue;
            }
            let expected = confidence_from(rule.success_count, rule.failure_count);
            if (rule.confidence - expected).abs() > CONFIDENCE_TOLERANCE {
                issues.push(
                    ValidationIssue::new(
                        format!("pattern-confidence-drift-{}", rule.id),
                        Severity::High,
                        "Pattern confidence disagrees with its counters",
                        format!(
                            "Rule '{}' stores {:.3} but {}/{} implies {:.3}",
                            rule.name,
                            rule.confidence,
                            rule.success_count,
                            rule.failure_count,
                            expected
                        ),
                    )
                    .auto_fixable(),
                );
            }
        }

        let pattern_ids: HashSet<_> = patterns.iter().map(|p| p.id).collect();
        for log in logs.iter().filter(|l| !pattern_ids.contains(&l.rule_id)) {
            issues.push(
                ValidationIssue::new(
                    format!("orphan-resolution-log-{}", log.id),
                    Severity::Medium,
                    "Resolution log references a missing pattern",
                    format!("Log {} points at rule {}", log.id, log.rule_id),
                )
                .auto_fixable(),
            );
        }

        let failure_ids: HashSet<_> = failures.iter().map(|f| f.id).collect();
        for escalation in escalations
            .iter()
            .filter(|e| !failure_ids.contains(&e.signature_id))
        {
            issues.push(
                ValidationIssue::new(
                    format!("orphan-escalation-{}", escalation.id),
                    Severity::Medium,
                    "Escalation references a missing failure",
                    format!(
                        "Escalation {} points at signature {}",
                        escalation.id, escalation.signature_id
                    ),
                )
                .auto_fixable(),
            );
        }

        Ok(issues)
    }
}
