//! Integration tests for the capture, remediation and learning pipeline.
//!
//! These tests drive the public API end to end against the in-memory and
//! JSON file stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use autoheal::classifier::{classify_error, determine_severity};
use autoheal::config::LearnerConfig;
use autoheal::fingerprint;
use autoheal::types::{ActionOutcome, ResolutionAction, RollbackOutcome};
use autoheal::{
    ActionName, ActionRegistry, CaptureRequest, ErrorCategory, ErrorDetails, FailureCapture,
    FailureContext, FailureSignature, JsonFileStore, MemoryStore, Method, PatternLearner,
    PatternMatcher, PatternRule, ResolutionExecutor, Severity, Store,
};
use tempfile::TempDir;

fn order_error(request: u32) -> ErrorDetails {
    ErrorDetails::new(
        "DatabaseError",
        format!("deadlock detected while saving order (request {})", 100_000 + request),
    )
    .with_code("40P01")
    .with_stack(
        "DatabaseError: deadlock detected\n    at OrderRepo.save (/srv/app/orders/repo.ts:88:11)\n    at OrderService.create (/srv/app/orders/service.ts:31:5)",
    )
}

fn capture_with(store: Arc<dyn Store>, registry: ActionRegistry) -> FailureCapture {
    FailureCapture::new(store, Arc::new(registry))
}

mod fingerprint_tests {
    use super::*;

    #[test]
    fn test_variable_data_does_not_change_fingerprint() {
        let context = FailureContext::new("/api/orders/123", Method::Post);
        let base = ErrorDetails::new("Error", "lookup failed for 550e8400-e29b-41d4-a716-446655440000");
        let other = ErrorDetails::new("Error", "lookup failed for 6ba7b810-9dad-11d1-80b4-00c04fd430c8");
        assert_eq!(
            fingerprint::generate(&base, &context),
            fingerprint::generate(&other, &context)
        );

        let mail_a = ErrorDetails::new("Error", "bounce for ann@example.com at 2024-05-01T10:00:00Z");
        let mail_b = ErrorDetails::new("Error", "bounce for bob@example.org at 2025-01-09T23:59:59Z");
        assert_eq!(
            fingerprint::generate(&mail_a, &context),
            fingerprint::generate(&mail_b, &context)
        );
    }

    #[test]
    fn test_different_shape_changes_fingerprint() {
        let context = FailureContext::new("/api/orders", Method::Post);
        let a = ErrorDetails::new("Error", "deadlock detected");
        let b = ErrorDetails::new("Error", "duplicate key");
        assert_ne!(
            fingerprint::generate(&a, &context),
            fingerprint::generate(&b, &context)
        );
        assert_eq!(fingerprint::generate(&a, &context).len(), fingerprint::FINGERPRINT_LEN);
    }
}

mod classification_tests {
    use super::*;

    #[test]
    fn test_invalid_email_is_medium_validation() {
        let error = ErrorDetails::new("Error", "Invalid email format, must be a valid address");
        let category = classify_error(&error, None);
        assert_eq!(category, ErrorCategory::Validation);
        assert_eq!(determine_severity(&error, category), Severity::Medium);
    }

    #[test]
    fn test_critical_precedence_over_category() {
        for (name, message, category) in [
            ("RateLimitError", "payment failed after retry storm", ErrorCategory::RateLimit),
            ("Error", "Payment failed: card declined", ErrorCategory::Payment),
            ("ValidationError", "data loss detected in import", ErrorCategory::Validation),
        ] {
            let error = ErrorDetails::new(name, message);
            assert_eq!(
                determine_severity(&error, category),
                Severity::Critical,
                "Failed for: {message}"
            );
        }
    }
}

mod capture_tests {
    use super::*;

    #[tokio::test]
    async fn test_same_logical_error_on_two_routes() {
        let store = Arc::new(MemoryStore::new());
        let capture = capture_with(store.clone(), ActionRegistry::default());

        let first = capture
            .capture(CaptureRequest::new(
                order_error(8812731),
                FailureContext::new("/api/orders/123", Method::Post),
            ))
            .await;
        let second = capture
            .capture(CaptureRequest::new(
                order_error(9910022),
                FailureContext::new("/api/orders/456", Method::Post),
            ))
            .await;

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(second.occurrence_count, first.occurrence_count + 1);
        assert_eq!(first.category, ErrorCategory::Database);
        assert_eq!(first.severity, Severity::High);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_occurrence_monotonicity_under_concurrency() {
        let store = Arc::new(MemoryStore::new());
        let capture = Arc::new(capture_with(store.clone(), ActionRegistry::default()));

        // seed so every concurrent capture has a previous row to bump
        let seed = capture
            .capture(CaptureRequest::new(
                order_error(1),
                FailureContext::new("/api/orders/1", Method::Post),
            ))
            .await;

        let handles: Vec<_> = (2..22)
            .map(|i| {
                let capture = capture.clone();
                tokio::spawn(async move {
                    capture
                        .capture(CaptureRequest::new(
                            order_error(i),
                            FailureContext::new(format!("/api/orders/{i}"), Method::Post),
                        ))
                        .await
                })
            })
            .collect();
        for handle in handles {
            let signature = handle.await.unwrap();
            assert!(signature.occurrence_count >= 2);
            assert_eq!(signature.first_seen, seed.first_seen);
        }

        let rows = store.list_failures(None).await.unwrap();
        assert_eq!(rows.len(), 21);
        for row in &rows {
            assert!(row.first_seen <= row.last_seen);
            assert_eq!(row.first_seen, seed.first_seen);
        }
        assert_eq!(rows.iter().map(|r| r.occurrence_count).max(), Some(21));

        let last = capture
            .capture(CaptureRequest::new(
                order_error(22),
                FailureContext::new("/api/orders/22", Method::Post),
            ))
            .await;
        assert_eq!(last.occurrence_count, 22);
    }

    #[tokio::test]
    async fn test_json_store_keeps_history_across_restarts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("autoheal/store.json");
        let request = || {
            CaptureRequest::new(
                order_error(77123),
                FailureContext::new("/api/orders/77", Method::Post),
            )
        };

        let first = {
            let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(&path).await.unwrap());
            capture_with(store, ActionRegistry::default())
                .capture(request())
                .await
        };

        let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let second = capture_with(store.clone(), ActionRegistry::default())
            .capture(request())
            .await;

        assert_eq!(second.occurrence_count, 2);
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(store.list_failures(None).await.unwrap().len(), 2);
    }
}

mod remediation_tests {
    use super::*;

    #[tokio::test]
    async fn test_exact_fingerprint_rule_scores_at_threshold() {
        let store = Arc::new(MemoryStore::new());
        let signature = capture_with(store.clone(), ActionRegistry::default())
            .capture(CaptureRequest::new(
                order_error(1),
                FailureContext::new("/api/orders/1", Method::Post),
            ))
            .await;

        let rule = PatternRule::new(
            "reset pool",
            ErrorCategory::Database,
            ResolutionAction::new(ActionName::ResetConnectionPool, 1_000),
        )
        .with_fingerprints(vec![signature.fingerprint.clone()])
        .with_history(1, 0);
        store.insert_pattern(&rule).await.unwrap();

        let matcher = PatternMatcher::new(store.clone(), 0.5);
        let m = matcher.find_best_match(&signature).await.unwrap();
        assert!((m.confidence - 0.5).abs() < f64::EPSILON);
        assert!(m.exact_fingerprint);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_action_rolls_back_and_lowers_confidence() {
        let rolled_back = Arc::new(AtomicUsize::new(0));
        let counter = rolled_back.clone();
        let registry = ActionRegistry::builder()
            .register_fn(ActionName::ResetConnectionPool, |_: FailureSignature| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("reset".to_string())
            })
            .register_fn(ActionName::ClearCache, move |_: FailureSignature| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("cleared".to_string())
                }
            })
            .build();

        let rule = PatternRule::new(
            "reset pool",
            ErrorCategory::Database,
            ResolutionAction::new(ActionName::ResetConnectionPool, 250)
                .with_rollback(ActionName::ClearCache),
        )
        .with_history(4, 0);
        let store = Arc::new(MemoryStore::with_patterns(vec![rule.clone()]));
        let executor = ResolutionExecutor::new(Arc::new(registry), store.clone());

        let signature = capture_with(store.clone(), ActionRegistry::default())
            .capture(CaptureRequest::new(
                order_error(1),
                FailureContext::new("/api/orders/1", Method::Post),
            ))
            .await;
        let outcome = executor.execute(&rule, &signature).await;

        assert!(!outcome.success());
        assert!(matches!(
            outcome.outcome,
            ActionOutcome::Failed {
                timed_out: true,
                rollback: RollbackOutcome::Succeeded { .. },
                ..
            }
        ));
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);

        let stored = store.get_pattern(rule.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert!((stored.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_feedback_loop_disqualifies_unreliable_rule() {
        let store = Arc::new(MemoryStore::new());
        let registry = ActionRegistry::builder()
            .register_fn(ActionName::ResetConnectionPool, |_: FailureSignature| async {
                Err(anyhow::anyhow!("pool still exhausted"))
            })
            .build();
        let capture = capture_with(store.clone(), registry);

        let seed = capture
            .capture(CaptureRequest::new(
                order_error(0),
                FailureContext::new("/api/orders/0", Method::Post),
            ))
            .await;
        let rule = PatternRule::new(
            "reset pool",
            ErrorCategory::Database,
            ResolutionAction::new(ActionName::ResetConnectionPool, 1_000),
        )
        .with_fingerprints(vec![seed.fingerprint.clone()])
        .with_conditions(vec![autoheal::types::MatchCondition::new(
            "error.code",
            autoheal::types::ConditionOperator::Equals,
            "40P01",
        )])
        .with_history(1, 0);
        store.insert_pattern(&rule).await.unwrap();

        // score 0.9 clears the 0.8 threshold, the action fails
        let attempt = capture
            .capture(CaptureRequest::new(
                order_error(1),
                FailureContext::new("/api/orders/1", Method::Post),
            ))
            .await;
        assert!(attempt.resolution.as_ref().is_some_and(|r| !r.success()));

        // confidence is now 0.5, so the score drops to 0.45 and nothing runs
        let after = capture
            .capture(CaptureRequest::new(
                order_error(2),
                FailureContext::new("/api/orders/2", Method::Post),
            ))
            .await;
        assert!(after.resolution.is_none());
        assert_eq!(store.list_resolution_logs().await.unwrap().len(), 1);
    }
}

mod learning_tests {
    use super::*;

    #[tokio::test]
    async fn test_learned_rule_is_disabled_until_reviewed() {
        let store = Arc::new(MemoryStore::new());
        let capture = capture_with(store.clone(), ActionRegistry::default());
        let learner = PatternLearner::new(store.clone(), LearnerConfig::default());

        for i in 0..2 {
            capture
                .capture(CaptureRequest::new(
                    order_error(i),
                    FailureContext::new(format!("/api/orders/{i}"), Method::Post),
                ))
                .await;
        }
        assert!(learner.learn_all().await.unwrap().is_empty());

        capture
            .capture(CaptureRequest::new(
                order_error(3),
                FailureContext::new("/api/orders/3", Method::Post),
            ))
            .await;
        let learned = learner.learn_all().await.unwrap();
        assert_eq!(learned.len(), 1);

        let rule = &learned[0];
        assert!(!rule.enabled);
        assert!((rule.confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(rule.category, ErrorCategory::Database);
        assert_eq!(rule.action.action, ActionName::ResetConnectionPool);
        assert_eq!(rule.fingerprints.len(), 1);

        // disabled rules never participate in matching
        let matcher = PatternMatcher::new(store.clone(), 0.5);
        let latest = store.list_failures(None).await.unwrap().pop().unwrap();
        assert!(matcher.find_best_match(&latest).await.is_none());
    }
}
