//! Confidence-scored rule matching.
//!
//! Score per rule:
//! - exact fingerprint hit: +0.5, otherwise the first listed fingerprint with
//!   similarity > 0.8 adds 0.3 × similarity
//! - fraction of conditions that hold: +0.4 × fraction
//! - the sum is multiplied by the rule's historical confidence and clamped to 1
//!
//! Results below the minimum score (0.5 by default) are discarded.

use std::cmp::Ordering;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::fingerprint::similarity;
use crate::store::Store;
use crate::types::{ConditionOperator, FailureSignature, MatchCondition, PatternMatch, PatternRule};

/// Weight of an exact fingerprint hit.
const EXACT_WEIGHT: f64 = 0.5;
/// Weight applied to the similarity of a near fingerprint.
const SIMILAR_WEIGHT: f64 = 0.3;
/// Similarity a listed fingerprint must exceed to count.
const SIMILARITY_FLOOR: f64 = 0.8;
/// Weight of the satisfied-condition fraction.
const CONDITION_WEIGHT: f64 = 0.4;

/// Default minimum score for a match to be returned.
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// Scores failure signatures against the enabled rules of their category.
pub struct PatternMatcher {
    store: Arc<dyn Store>,
    min_score: f64,
}

impl PatternMatcher {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, min_score: f64) -> Self {
        Self { store, min_score }
    }

    /// Best-scoring enabled rule for `signature`, if any clears the minimum.
    ///
    /// Store errors are logged and treated as "no match".
    pub async fn find_best_match(&self, signature: &FailureSignature) -> Option<PatternMatch> {
        let rules = match self.store.enabled_patterns(signature.category).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    category = %signature.category,
                    "Failed to load patterns, skipping match: {e}"
                );
                return None;
            }
        };

        let document = match serde_json::to_value(signature) {
            Ok(document) => document,
            Err(e) => {
                warn!("Failed to serialize signature for matching: {e}");
                return None;
            }
        };

        let best = rules
            .iter()
            .filter_map(|rule| self.score_against(rule, signature, &document))
            .fold(None::<PatternMatch>, |best, candidate| match best {
                Some(current) if current.confidence >= candidate.confidence => Some(current),
                _ => Some(candidate),
            });

        match &best {
            Some(m) => debug!(
                fingerprint = %signature.fingerprint,
                rule_id = %m.rule.id,
                confidence = m.confidence,
                signals = ?m.matched_signals,
                "Matched pattern"
            ),
            None => debug!(
                fingerprint = %signature.fingerprint,
                candidates = rules.len(),
                "No pattern matched"
            ),
        }
        best
    }

    /// Score one rule. Returns `None` below the minimum score.
    pub fn score_rule(&self, rule: &PatternRule, signature: &FailureSignature) -> Option<PatternMatch> {
        let document = serde_json::to_value(signature).ok()?;
        self.score_against(rule, signature, &document)
    }

    fn score_against(
        &self,
        rule: &PatternRule,
        signature: &FailureSignature,
        document: &Value,
    ) -> Option<PatternMatch> {
        if rule.min_severity > signature.severity {
            return None;
        }

        let mut signals = Vec::new();
        let mut score = 0.0;

        let exact = rule.fingerprints.iter().any(|f| *f == signature.fingerprint);
        if exact {
            score += EXACT_WEIGHT;
            signals.push("exact_fingerprint".to_string());
        } else if let Some(sim) = rule
            .fingerprints
            .iter()
            .map(|f| similarity(f, &signature.fingerprint))
            .find(|sim| *sim > SIMILARITY_FLOOR)
        {
            score += SIMILAR_WEIGHT * sim;
            signals.push(format!("similar_fingerprint:{sim:.2}"));
        }

        if !rule.conditions.is_empty() {
            let held: Vec<&MatchCondition> = rule
                .conditions
                .iter()
                .filter(|c| evaluate_condition(c, document))
                .collect();
            score += CONDITION_WEIGHT * held.len() as f64 / rule.conditions.len() as f64;
            signals.extend(held.iter().map(|c| format!("condition:{}", c.field)));
        }

        let confidence = (score * rule.confidence).min(1.0);
        if confidence < self.min_score {
            return None;
        }

        Some(PatternMatch {
            rule: rule.clone(),
            confidence,
            matched_signals: signals,
            exact_fingerprint: exact,
        })
    }
}

/// Look up a dot path. Any missing intermediate yields `None`.
///
/// Array elements are addressed by index (`context.payload.items.0`).
#[must_use]
pub fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Whether `condition` holds against a serialized signature.
///
/// Fails closed: missing fields, type mismatches and invalid regexes are `false`.
#[must_use]
pub fn evaluate_condition(condition: &MatchCondition, document: &Value) -> bool {
    let Some(actual) = lookup(document, &condition.field) else {
        return false;
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => actual == expected,
        },
        ConditionOperator::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.contains(needle),
            _ => false,
        },
        ConditionOperator::Matches => match (actual.as_str(), expected.as_str()) {
            (Some(text), Some(pattern)) => Regex::new(pattern).is_ok_and(|re| re.is_match(text)),
            _ => false,
        },
        ConditionOperator::In => expected
            .as_array()
            .is_some_and(|options| options.contains(actual)),
        ConditionOperator::Gt => compare(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Lt => compare(actual, expected) == Some(Ordering::Less),
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    actual.as_f64()?.partial_cmp(&expected.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::tests::sample_signature;
    use crate::store::MemoryStore;
    use crate::types::{ActionName, ErrorCategory, ResolutionAction, Severity};
    use serde_json::json;

    fn rule() -> PatternRule {
        PatternRule::new(
            "network retry",
            ErrorCategory::Network,
            ResolutionAction::new(ActionName::RetryOperation, 1_000),
        )
    }

    fn matcher(rules: Vec<PatternRule>) -> PatternMatcher {
        PatternMatcher::new(Arc::new(MemoryStore::with_patterns(rules)), DEFAULT_MIN_SCORE)
    }

    #[tokio::test]
    async fn test_exact_fingerprint_at_threshold_matches() {
        let signature = sample_signature();
        let rule = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_history(1, 0);

        let m = matcher(vec![rule]).find_best_match(&signature).await.unwrap();
        assert!((m.confidence - 0.5).abs() < f64::EPSILON);
        assert!(m.exact_fingerprint);
        assert_eq!(m.matched_signals, vec!["exact_fingerprint".to_string()]);
    }

    #[tokio::test]
    async fn test_prior_confidence_halves_score() {
        let signature = sample_signature();
        // (0.5 + 0.4) * 0.5 = 0.45, below threshold
        let rule = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_conditions(vec![MatchCondition::new(
                "error.name",
                ConditionOperator::Equals,
                "Error",
            )]);
        assert!(matcher(vec![rule]).find_best_match(&signature).await.is_none());
    }

    #[test]
    fn test_conditions_alone_never_clear_threshold() {
        let signature = sample_signature();
        let rule = rule()
            .with_conditions(vec![MatchCondition::new(
                "context.route",
                ConditionOperator::Equals,
                "/api/orders",
            )])
            .with_history(10, 0);
        assert!(matcher(vec![]).score_rule(&rule, &signature).is_none());
    }

    #[test]
    fn test_similar_fingerprint_counts_once() {
        let signature = sample_signature();
        let near = format!("{}0", &signature.fingerprint[..15]);
        let rule = rule()
            .with_fingerprints(vec![near.clone(), near])
            .with_conditions(vec![MatchCondition::new(
                "error.message",
                ConditionOperator::Contains,
                "ECONN",
            )])
            .with_history(5, 0);

        let m = matcher(vec![]).score_rule(&rule, &signature).unwrap();
        // 0.3 * 15/16 + 0.4
        assert!((m.confidence - (0.3 * 15.0 / 16.0 + 0.4)).abs() < 1e-9);
        assert!(!m.exact_fingerprint);
        assert_eq!(m.matched_signals.len(), 2);
    }

    #[test]
    fn test_score_is_clamped() {
        let signature = sample_signature();
        let rule = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_conditions(vec![MatchCondition::new(
                "severity",
                ConditionOperator::Equals,
                "low",
            )])
            .with_history(3, 0);
        let m = matcher(vec![]).score_rule(&rule, &signature).unwrap();
        assert!(m.confidence <= 1.0);
        assert!(m.confidence >= DEFAULT_MIN_SCORE);
    }

    #[test]
    fn test_min_severity_gate() {
        let signature = sample_signature();
        let rule = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_min_severity(Severity::High)
            .with_history(1, 0);
        assert!(matcher(vec![]).score_rule(&rule, &signature).is_none());
    }

    #[tokio::test]
    async fn test_best_of_several_rules() {
        let signature = sample_signature();
        let weak = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_history(1, 0);
        let strong = rule()
            .with_fingerprints(vec![signature.fingerprint.clone()])
            .with_conditions(vec![MatchCondition::new(
                "context.method",
                ConditionOperator::In,
                json!(["GET", "POST"]),
            )])
            .with_history(4, 0);
        let strong_id = strong.id;

        let m = matcher(vec![weak, strong]).find_best_match(&signature).await.unwrap();
        assert_eq!(m.rule.id, strong_id);
        assert!((m.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_fails_closed() {
        let doc = json!({ "context": { "payload": { "items": [ { "sku": "A1" } ] } } });
        assert_eq!(lookup(&doc, "context.payload.items.0.sku"), Some(&json!("A1")));
        assert_eq!(lookup(&doc, "context.payload.missing.sku"), None);
        assert_eq!(lookup(&doc, "context.payload.items.9"), None);
        assert_eq!(lookup(&doc, "context.payload.items.0.sku.deeper"), None);
    }

    #[test]
    fn test_operators() {
        let doc = json!({ "amount": 120, "tags": ["retry", "eu"], "name": "ConnectionRefused" });
        let check = |field: &str, op, value: Value| {
            evaluate_condition(&MatchCondition::new(field, op, value), &doc)
        };

        assert!(check("amount", ConditionOperator::Gt, json!(100)));
        assert!(!check("amount", ConditionOperator::Lt, json!(100)));
        assert!(check("amount", ConditionOperator::Equals, json!(120.0)));
        assert!(check("tags", ConditionOperator::Contains, json!("eu")));
        assert!(check("name", ConditionOperator::Matches, json!("^Connection")));
        assert!(!check("name", ConditionOperator::Matches, json!("(unclosed")));
        assert!(check("name", ConditionOperator::In, json!(["ConnectionRefused"])));
        assert!(!check("name", ConditionOperator::Gt, json!(1)));
    }
}
