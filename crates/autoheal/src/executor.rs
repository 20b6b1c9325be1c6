//! Time-bounded execution of remediation actions.
//!
//! Every run races the action against its timeout. The action runs as a
//! detached task, so a timeout abandons it rather than cancelling it.
//! Failures (errors, panics, timeouts) take the rollback branch, and every
//! executed attempt feeds the rule's confidence through the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionRegistry, RemediationAction};
use crate::store::Store;
use crate::types::{
    ActionName, ActionOutcome, FailureSignature, PatternRule, ResolutionLogEntry,
    ResolutionOutcome, RollbackOutcome,
};

/// Why a bounded run did not succeed.
#[derive(Debug)]
enum RunFailure {
    TimedOut(Duration),
    Errored(String),
}

impl RunFailure {
    fn message(&self) -> String {
        match self {
            Self::TimedOut(limit) => format!("timed out after {}ms", limit.as_millis()),
            Self::Errored(e) => e.clone(),
        }
    }
}

/// Runs matched rules' actions and records what happened.
pub struct ResolutionExecutor {
    registry: Arc<ActionRegistry>,
    store: Arc<dyn Store>,
}

impl ResolutionExecutor {
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// Execute `rule`'s action for `signature`.
    ///
    /// Never fails: store errors while recording are logged and the outcome
    /// is still returned.
    pub async fn execute(&self, rule: &PatternRule, signature: &FailureSignature) -> ResolutionOutcome {
        let started = Instant::now();
        let descriptor = &rule.action;

        let outcome = if descriptor.requires_approval {
            info!(
                rule_id = %rule.id,
                action = %descriptor.action,
                fingerprint = %signature.fingerprint,
                "Resolution requires approval, not executing"
            );
            ActionOutcome::AwaitingApproval
        } else if let Some(action) = self.registry.get(descriptor.action) {
            let limit = Duration::from_millis(descriptor.timeout_ms);
            match run_bounded(action, signature, limit).await {
                Ok(detail) => {
                    info!(
                        rule_id = %rule.id,
                        action = %descriptor.action,
                        "Resolution succeeded"
                    );
                    ActionOutcome::Succeeded { detail }
                }
                Err(failure) => {
                    warn!(
                        rule_id = %rule.id,
                        action = %descriptor.action,
                        error = %failure.message(),
                        "Resolution failed"
                    );
                    let rollback = self.rollback(descriptor.rollback, signature, limit).await;
                    ActionOutcome::Failed {
                        error: failure.message(),
                        timed_out: matches!(failure, RunFailure::TimedOut(_)),
                        rollback,
                    }
                }
            }
        } else {
            warn!(
                rule_id = %rule.id,
                action = %descriptor.action,
                "No implementation registered for action, skipping"
            );
            ActionOutcome::Unregistered
        };

        let resolution = ResolutionOutcome {
            rule_id: rule.id,
            action: descriptor.action,
            outcome,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            executed_at: Utc::now(),
        };

        self.record(&resolution, signature).await;
        resolution
    }

    /// Best-effort rollback. Its own failure is logged and reported, never raised.
    async fn rollback(
        &self,
        rollback: Option<ActionName>,
        signature: &FailureSignature,
        limit: Duration,
    ) -> RollbackOutcome {
        let Some(name) = rollback else {
            return RollbackOutcome::NotDefined;
        };
        let Some(action) = self.registry.get(name) else {
            warn!(action = %name, "Rollback action is not registered");
            return RollbackOutcome::Unregistered { action: name };
        };

        match run_bounded(action, signature, limit).await {
            Ok(_) => {
                info!(action = %name, "Rollback succeeded");
                RollbackOutcome::Succeeded { action: name }
            }
            Err(failure) => {
                error!(action = %name, error = %failure.message(), "Rollback failed");
                RollbackOutcome::Failed {
                    action: name,
                    error: failure.message(),
                }
            }
        }
    }

    async fn record(&self, resolution: &ResolutionOutcome, signature: &FailureSignature) {
        if resolution.executed() {
            match self
                .store
                .record_pattern_outcome(resolution.rule_id, resolution.success(), resolution.executed_at)
                .await
            {
                Ok(rule) => debug!(
                    rule_id = %rule.id,
                    success_count = rule.success_count,
                    failure_count = rule.failure_count,
                    confidence = rule.confidence,
                    "Updated rule confidence"
                ),
                Err(e) => warn!(rule_id = %resolution.rule_id, "Failed to record rule outcome: {e}"),
            }
        }

        let entry = ResolutionLogEntry::from_outcome(signature, resolution);
        if let Err(e) = self.store.insert_resolution_log(&entry).await {
            warn!(rule_id = %resolution.rule_id, "Failed to write resolution log: {e}");
        }
    }
}

/// Race `action` against `limit` on a detached task.
async fn run_bounded(
    action: Arc<dyn RemediationAction>,
    signature: &FailureSignature,
    limit: Duration,
) -> Result<String, RunFailure> {
    let signature = signature.clone();
    let handle = tokio::spawn(async move { action.run(&signature).await });

    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(Ok(detail))) => Ok(detail),
        Ok(Ok(Err(e))) => Err(RunFailure::Errored(format!("{e:#}"))),
        Ok(Err(join)) => Err(RunFailure::Errored(format!("action panicked: {join}"))),
        Err(_) => Err(RunFailure::TimedOut(limit)),
    }
}
