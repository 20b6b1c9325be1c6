//! Failure capture pipeline.
//!
//! One call handles one failure:
//! 1. sanitize the context and stamp its timestamp
//! 2. fingerprint and classify (caller overrides win)
//! 3. snapshot the system state
//! 4. carry history forward from the latest row with the same fingerprint
//! 5. match against the pattern library and auto-resolve above the threshold
//! 6. persist the new row and any escalation
//!
//! Capture never fails. Store errors are logged and the in-memory signature
//! is returned regardless, so a secondary failure cannot mask the one being
//! handled.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sysinfo::System;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::actions::ActionRegistry;
use crate::classifier::{classify_error, determine_severity};
use crate::config::{AutohealConfig, CaptureConfig};
use crate::executor::ResolutionExecutor;
use crate::fingerprint;
use crate::matcher::{PatternMatcher, DEFAULT_MIN_SCORE};
use crate::store::Store;
use crate::types::{
    ActionOutcome, ErrorCategory, ErrorDetails, Escalation, EscalationReason, FailureContext,
    FailureSignature, ResolutionOutcome, Severity, SystemState,
};

/// Replacement for sensitive payload and header values.
pub const REDACTED: &str = "[REDACTED]";

/// Input to [`FailureCapture::capture`].
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub error: ErrorDetails,
    pub context: FailureContext,
    /// Overrides classification when set
    pub category: Option<ErrorCategory>,
    /// Overrides severity derivation when set
    pub severity: Option<Severity>,
}

impl CaptureRequest {
    pub fn new(error: ErrorDetails, context: FailureContext) -> Self {
        Self {
            error,
            context,
            category: None,
            severity: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }
}

/// Orchestrates capture, dedup, auto-resolution and persistence.
pub struct FailureCapture {
    store: Arc<dyn Store>,
    matcher: PatternMatcher,
    executor: ResolutionExecutor,
    config: CaptureConfig,
}

impl FailureCapture {
    /// Create a pipeline with default thresholds.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            matcher: PatternMatcher::new(store.clone(), DEFAULT_MIN_SCORE),
            executor: ResolutionExecutor::new(registry, store.clone()),
            store,
            config: CaptureConfig::default(),
        }
    }

    /// Create a pipeline from loaded configuration.
    #[must_use]
    pub fn from_config(
        store: Arc<dyn Store>,
        registry: Arc<ActionRegistry>,
        config: &AutohealConfig,
    ) -> Self {
        Self {
            matcher: PatternMatcher::new(store.clone(), config.matcher.min_score),
            executor: ResolutionExecutor::new(registry, store.clone()),
            store,
            config: config.capture.clone(),
        }
    }

    /// Capture one failure and return the populated signature.
    pub async fn capture(&self, request: CaptureRequest) -> FailureSignature {
        let now = Utc::now();
        let CaptureRequest {
            error,
            mut context,
            category,
            severity,
        } = request;

        context.timestamp = now;
        context.payload = context
            .payload
            .map(|payload| sanitize_value(payload, &self.config.sensitive_keys));
        context.headers = context
            .headers
            .map(|headers| sanitize_headers(headers, &self.config.sensitive_keys));

        let fingerprint = fingerprint::generate(&error, &context);
        let category = category.unwrap_or_else(|| classify_error(&error, Some(&context.route)));
        let severity = severity.unwrap_or_else(|| determine_severity(&error, category));
        let system_state = snapshot_system_state(&self.config.env_key_prefixes);
        let (first_seen, occurrence_count) = self.track_occurrence(&fingerprint, now).await;

        let mut signature = FailureSignature {
            id: Uuid::new_v4(),
            fingerprint,
            timestamp: now,
            category,
            severity,
            context,
            error,
            system_state,
            resolution: None,
            occurrence_count,
            first_seen,
            last_seen: now,
        };

        info!(
            fingerprint = %signature.fingerprint,
            category = %signature.category,
            severity = %signature.severity,
            occurrences = signature.occurrence_count,
            "Captured failure"
        );

        let mut approval_rule = None;
        if let Some(matched) = self.matcher.find_best_match(&signature).await {
            if matched.confidence >= self.config.auto_resolve_threshold {
                let outcome = self.executor.execute(&matched.rule, &signature).await;
                if outcome.outcome == ActionOutcome::AwaitingApproval {
                    approval_rule = Some(matched.rule.id);
                }
                signature.resolution = Some(outcome);
            } else {
                debug!(
                    rule_id = %matched.rule.id,
                    confidence = matched.confidence,
                    threshold = self.config.auto_resolve_threshold,
                    "Match below auto-resolve threshold"
                );
            }
        }

        if let Err(e) = self.store.insert_failure(&signature).await {
            error!(fingerprint = %signature.fingerprint, "Failed to persist failure: {e}");
        }

        if let Some(rule_id) = approval_rule {
            self.escalate(&signature, EscalationReason::ApprovalRequired, Some(rule_id))
                .await;
        } else if self.config.escalate_critical
            && signature.severity == Severity::Critical
            && !signature.resolution.as_ref().is_some_and(ResolutionOutcome::resolved)
        {
            let rule_id = signature.resolution.as_ref().map(|r| r.rule_id);
            self.escalate(&signature, EscalationReason::CriticalUnresolved, rule_id)
                .await;
        }

        signature
    }

    /// Returns `(first_seen, occurrence_count)` for a new row.
    ///
    /// Bumps the previous row through the store's atomic increment so
    /// concurrent captures of one fingerprint never lose a count.
    async fn track_occurrence(&self, fingerprint: &str, now: DateTime<Utc>) -> (DateTime<Utc>, u64) {
        let previous = match self.store.latest_failure(fingerprint).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!(fingerprint = %fingerprint, "Failed to look up previous occurrence: {e}");
                None
            }
        };
        let Some(previous) = previous else {
            return (now, 1);
        };

        let count = match self.store.touch_occurrence(fingerprint, now).await {
            Ok(Some(count)) => count,
            Ok(None) => previous.occurrence_count + 1,
            Err(e) => {
                warn!(fingerprint = %fingerprint, "Failed to increment occurrence: {e}");
                previous.occurrence_count + 1
            }
        };
        (previous.first_seen.min(now), count)
    }

    async fn escalate(
        &self,
        signature: &FailureSignature,
        reason: EscalationReason,
        rule_id: Option<Uuid>,
    ) {
        let escalation = Escalation {
            id: Uuid::new_v4(),
            signature_id: signature.id,
            fingerprint: signature.fingerprint.clone(),
            reason,
            severity: signature.severity,
            rule_id,
            created_at: Utc::now(),
        };
        warn!(
            fingerprint = %signature.fingerprint,
            reason = ?reason,
            "Escalating failure for manual follow-up"
        );
        if let Err(e) = self.store.insert_escalation(&escalation).await {
            error!(fingerprint = %signature.fingerprint, "Failed to persist escalation: {e}");
        }
    }
}

fn is_sensitive(key: &str, markers: &[String]) -> bool {
    let key = key.to_ascii_lowercase();
    markers
        .iter()
        .any(|marker| key.contains(&marker.to_ascii_lowercase()))
}

/// Redact values under sensitive keys, recursively.
#[must_use]
pub fn sanitize_value(value: Value, markers: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if is_sensitive(&key, markers) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, sanitize_value(value, markers))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| sanitize_value(item, markers))
                .collect(),
        ),
        other => other,
    }
}

/// Redact sensitive header values.
#[must_use]
pub fn sanitize_headers(
    headers: HashMap<String, String>,
    markers: &[String],
) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(key, value)| {
            if is_sensitive(&key, markers) {
                (key, REDACTED.to_string())
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Point-in-time resource snapshot. Records env var names only, never values.
///
/// An empty prefix list records every name.
#[must_use]
pub fn snapshot_system_state(env_key_prefixes: &[String]) -> SystemState {
    let mut sys = System::new();
    sys.refresh_memory();

    let mut env_keys: Vec<String> = std::env::vars_os()
        .filter_map(|(key, _)| key.into_string().ok())
        .filter(|key| {
            env_key_prefixes.is_empty()
                || env_key_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
        })
        .collect();
    env_keys.sort();

    SystemState {
        memory_used_bytes: sys.used_memory(),
        memory_total_bytes: sys.total_memory(),
        runtime_version: format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string())
        ),
        process_id: std::process::id(),
        env_keys,
    }
}
