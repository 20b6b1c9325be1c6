//! Pattern synthesis from clusters of historical failures.
//!
//! Learned rules are conservative: a condition is only added when the whole
//! cluster agrees on a field, and every rule starts disabled at the prior
//! confidence until an operator reviews it.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::LearnerConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::{
    ActionName, ConditionOperator, ErrorCategory, FailureSignature, MatchCondition, PatternRule,
    ResolutionAction, Severity,
};

/// Builds disabled pattern rules from failure clusters.
pub struct PatternLearner {
    store: Arc<dyn Store>,
    config: LearnerConfig,
}

impl PatternLearner {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: LearnerConfig) -> Self {
        Self { store, config }
    }

    /// Derive a rule from one cluster.
    ///
    /// Returns `None` for clusters smaller than the minimum size or spanning
    /// more than one category.
    #[must_use]
    pub fn learn(&self, cluster: &[FailureSignature]) -> Option<PatternRule> {
        if cluster.len() < self.config.min_cluster_size {
            debug!(size = cluster.len(), "Cluster too small to learn from");
            return None;
        }
        let category = cluster.first()?.category;
        if cluster.iter().any(|s| s.category != category) {
            debug!("Cluster spans several categories, not learning");
            return None;
        }

        let mut seen = HashSet::new();
        let fingerprints: Vec<String> = cluster
            .iter()
            .filter(|s| seen.insert(s.fingerprint.as_str()))
            .map(|s| s.fingerprint.clone())
            .collect();

        let mut conditions = Vec::new();
        if let Some(name) = unanimous(cluster, |s| Some(s.error.name.as_str())) {
            conditions.push(MatchCondition::new("error.name", ConditionOperator::Equals, name));
        }
        if let Some(route) = unanimous(cluster, |s| Some(s.context.route.as_str())) {
            conditions.push(MatchCondition::new(
                "context.route",
                ConditionOperator::Equals,
                route,
            ));
        }
        if let Some(code) = unanimous(cluster, |s| s.error.code.as_deref()) {
            conditions.push(MatchCondition::new("error.code", ConditionOperator::Equals, code));
        }

        let label = unanimous(cluster, |s| Some(s.error.name.as_str())).unwrap_or("mixed");
        let mut action = ResolutionAction::new(
            ActionName::default_for(category),
            self.config.action_timeout_ms,
        );
        if category == ErrorCategory::Payment {
            action = action.requiring_approval();
        }

        let rule = PatternRule::new(format!("Learned: {category} / {label}"), category, action)
            .with_description(format!(
                "Learned from {} failures across {} fingerprints",
                cluster.len(),
                fingerprints.len()
            ))
            .with_fingerprints(fingerprints)
            .with_conditions(conditions)
            .with_min_severity(Severity::Medium)
            .disabled();
        Some(rule)
    }

    /// Learn rules for one category from stored failures.
    ///
    /// Fingerprints already anchored by an existing rule in the category are
    /// skipped. The rest are grouped by error name and every large enough
    /// group becomes a new, disabled rule.
    pub async fn learn_from_store(&self, category: ErrorCategory) -> Result<Vec<PatternRule>> {
        let failures = self.store.list_failures(Some(category)).await?;
        let anchored: HashSet<String> = self
            .store
            .list_patterns()
            .await?
            .into_iter()
            .filter(|p| p.category == category)
            .flat_map(|p| p.fingerprints)
            .collect();

        let mut groups: BTreeMap<String, Vec<FailureSignature>> = BTreeMap::new();
        for failure in failures {
            if anchored.contains(&failure.fingerprint) {
                continue;
            }
            groups
                .entry(failure.error.name.clone())
                .or_default()
                .push(failure);
        }

        let mut learned = Vec::new();
        for (name, cluster) in groups {
            let Some(rule) = self.learn(&cluster) else {
                continue;
            };
            self.store.insert_pattern(&rule).await?;
            info!(
                rule_id = %rule.id,
                category = %category,
                error_name = %name,
                cluster = cluster.len(),
                "Learned new pattern (disabled pending review)"
            );
            learned.push(rule);
        }
        Ok(learned)
    }

    /// Run [`Self::learn_from_store`] for every category.
    pub async fn learn_all(&self) -> Result<Vec<PatternRule>> {
        let mut learned = Vec::new();
        for category in ErrorCategory::ALL {
            learned.extend(self.learn_from_store(category).await?);
        }
        Ok(learned)
    }
}

/// The single value every signature agrees on, if any.
fn unanimous<'a>(
    cluster: &'a [FailureSignature],
    field: impl Fn(&'a FailureSignature) -> Option<&'a str>,
) -> Option<&'a str> {
    let mut values = cluster.iter().map(field);
    let first = values.next()??;
    values.all(|v| v == Some(first)).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::sample_signature;
    use crate::store::MemoryStore;
    use crate::types::PRIOR_CONFIDENCE;

    fn learner(store: Arc<MemoryStore>) -> PatternLearner {
        PatternLearner::new(store, LearnerConfig::default())
    }

    fn failure(fingerprint: &str, name: &str, route: &str) -> FailureSignature {
        let mut s = sample_signature();
        s.id = uuid::Uuid::new_v4();
        s.fingerprint = fingerprint.to_string();
        s.error.name = name.to_string();
        s.context.route = route.to_string();
        s
    }

    #[test]
    fn test_two_signatures_learn_nothing() {
        let l = learner(Arc::new(MemoryStore::new()));
        let cluster = vec![failure("a", "E", "/x"), failure("b", "E", "/x")];
        assert!(l.learn(&cluster).is_none());
    }

    #[test]
    fn test_three_signatures_learn_disabled_rule() {
        let l = learner(Arc::new(MemoryStore::new()));
        let cluster = vec![
            failure("a", "SocketError", "/api/sync"),
            failure("b", "SocketError", "/api/sync"),
            failure("a", "SocketError", "/api/sync"),
        ];
        let rule = l.learn(&cluster).unwrap();

        assert!(!rule.enabled);
        assert!((rule.confidence - PRIOR_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!((rule.success_count, rule.failure_count), (0, 0));
        assert_eq!(rule.min_severity, Severity::Medium);
        assert_eq!(rule.fingerprints, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(rule.action.action, ActionName::RetryOperation);

        let fields: Vec<&str> = rule.conditions.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["error.name", "context.route"]);
    }

    #[test]
    fn test_mixed_fields_yield_no_condition() {
        let l = learner(Arc::new(MemoryStore::new()));
        let cluster = vec![
            failure("a", "SocketError", "/api/a"),
            failure("b", "TimeoutError", "/api/b"),
            failure("c", "SocketError", "/api/c"),
        ];
        let rule = l.learn(&cluster).unwrap();
        assert!(rule
            .conditions
            .iter()
            .all(|c| c.field != "error.name" && c.field != "context.route"));
        assert!(rule.name.ends_with("mixed"));
    }

    #[test]
    fn test_payment_rules_require_approval() {
        let l = learner(Arc::new(MemoryStore::new()));
        let cluster: Vec<_> = (0..3)
            .map(|i| {
                let mut s = failure(&format!("f{i}"), "StripeError", "/api/checkout");
                s.category = ErrorCategory::Payment;
                s
            })
            .collect();
        let rule = l.learn(&cluster).unwrap();
        assert!(rule.action.requires_approval);
        assert_eq!(rule.action.action, ActionName::ReconcileSubscription);
    }

    #[tokio::test]
    async fn test_learn_from_store_skips_anchored_fingerprints() {
        let existing = PatternRule::new(
            "known",
            ErrorCategory::Network,
            ResolutionAction::new(ActionName::RetryOperation, 1_000),
        )
        .with_fingerprints(vec!["known".to_string()]);
        let store = Arc::new(MemoryStore::with_patterns(vec![existing]));
        for fp in ["known", "known", "known", "n1", "n2", "n1"] {
            store
                .insert_failure(&failure(fp, "SocketError", "/api/sync"))
                .await
                .unwrap();
        }

        let learned = learner(store.clone())
            .learn_from_store(ErrorCategory::Network)
            .await
            .unwrap();
        assert_eq!(learned.len(), 1);
        assert_eq!(learned[0].fingerprints, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(store.list_patterns().await.unwrap().len(), 2);

        // second pass finds everything anchored
        let again = learner(store).learn_all().await.unwrap();
        assert!(again.is_empty());
    }
}
