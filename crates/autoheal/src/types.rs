//! Core types for failure capture and remediation.
//!
//! This module defines the primary data structures for:
//! - Snapshotting a raw error and the context it happened in
//! - Persisted failure signatures with occurrence tracking
//! - Remediation pattern rules and their match conditions
//! - Resolution outcomes, resolution log rows and escalations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Authorization,
    Validation,
    Database,
    Payment,
    Email,
    ExternalApi,
    RateLimit,
    FileUpload,
    Network,
    Unknown,
}

impl ErrorCategory {
    /// Every category, in classifier table order followed by `Unknown`.
    pub const ALL: [Self; 11] = [
        Self::Authentication,
        Self::Authorization,
        Self::Validation,
        Self::Database,
        Self::Payment,
        Self::Email,
        Self::ExternalApi,
        Self::RateLimit,
        Self::FileUpload,
        Self::Network,
        Self::Unknown,
    ];

    /// Get the category's wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Validation => "validation",
            Self::Database => "database",
            Self::Payment => "payment",
            Self::Email => "email",
            Self::ExternalApi => "external_api",
            Self::RateLimit => "rate_limit",
            Self::FileUpload => "file_upload",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "category",
                value: s.to_string(),
            })
    }
}

/// Ordinal urgency ranking: `Critical > High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(Error::UnknownVariant {
                kind: "severity",
                value: s.to_string(),
            }),
        }
    }
}

/// Immutable snapshot of a raw error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error type name (e.g. `TypeError`, `ConnectionRefused`)
    pub name: String,
    /// Human-readable message
    pub message: String,
    /// Raw stack text, one frame per line
    #[serde(default)]
    pub stack: String,
    /// Message of the underlying cause, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Machine-readable error code (e.g. `ECONNREFUSED`, `P2002`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorDetails {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: String::new(),
            cause: None,
            code: None,
        }
    }

    /// Build details from any `std::error::Error`.
    ///
    /// The name is the unqualified type name and the cause is the first
    /// `source()` in the chain.
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let base = full.split('<').next().unwrap_or(full);
        let name = base.rsplit("::").next().unwrap_or(base).to_string();
        Self {
            name,
            message: err.to_string(),
            stack: String::new(),
            cause: err.source().map(ToString::to_string),
            code: None,
        }
    }

    #[must_use]
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = stack.into();
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

/// Kind of operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    /// Background or scheduled job
    Job,
    /// Inbound event or webhook
    Event,
}

impl Method {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Job => "JOB",
            Self::Event => "EVENT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "JOB" => Ok(Self::Job),
            "EVENT" => Ok(Self::Event),
            _ => Err(Error::UnknownVariant {
                kind: "method",
                value: s.to_string(),
            }),
        }
    }
}

/// Where and for whom a failure happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Operation or route identifier
    pub route: String,
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Request payload, sanitized by the capture pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Request headers, sanitized by the capture pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Stamped by the capture pipeline; caller-supplied values are overwritten.
    pub timestamp: DateTime<Utc>,
}

impl FailureContext {
    pub fn new(route: impl Into<String>, method: Method) -> Self {
        Self {
            route: route.into(),
            method,
            user_id: None,
            payload: None,
            headers: None,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Point-in-time resource snapshot. Holds environment variable names only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub runtime_version: String,
    pub process_id: u32,
    pub env_keys: Vec<String>,
}

/// Persisted record of one observed failure occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignature {
    pub id: Uuid,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub context: FailureContext,
    pub error: ErrorDetails,
    pub system_state: SystemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolutionOutcome>,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Comparison applied by a [`MatchCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Matches,
    In,
    Gt,
    Lt,
}

/// A dot-path predicate over a serialized [`FailureSignature`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCondition {
    /// Dot path such as `error.name` or `context.payload.amount`
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

impl MatchCondition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Fixed set of remediation action names.
///
/// Implementations are injected through [`crate::actions::ActionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionName {
    RetryOperation,
    ClearCache,
    RefreshSession,
    ResetConnectionPool,
    ReconcileSubscription,
    ResendEmail,
    BackoffRateLimit,
    CleanupUpload,
    ReloadConfig,
}

impl ActionName {
    pub const ALL: [Self; 9] = [
        Self::RetryOperation,
        Self::ClearCache,
        Self::RefreshSession,
        Self::ResetConnectionPool,
        Self::ReconcileSubscription,
        Self::ResendEmail,
        Self::BackoffRateLimit,
        Self::CleanupUpload,
        Self::ReloadConfig,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RetryOperation => "retry_operation",
            Self::ClearCache => "clear_cache",
            Self::RefreshSession => "refresh_session",
            Self::ResetConnectionPool => "reset_connection_pool",
            Self::ReconcileSubscription => "reconcile_subscription",
            Self::ResendEmail => "resend_email",
            Self::BackoffRateLimit => "backoff_rate_limit",
            Self::CleanupUpload => "cleanup_upload",
            Self::ReloadConfig => "reload_config",
        }
    }

    /// Default remediation for a category, used by learned rules.
    #[must_use]
    pub fn default_for(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::Authentication | ErrorCategory::Authorization => Self::RefreshSession,
            ErrorCategory::Database => Self::ResetConnectionPool,
            ErrorCategory::Payment => Self::ReconcileSubscription,
            ErrorCategory::Email => Self::ResendEmail,
            ErrorCategory::RateLimit => Self::BackoffRateLimit,
            ErrorCategory::FileUpload => Self::CleanupUpload,
            ErrorCategory::Validation => Self::ClearCache,
            ErrorCategory::ExternalApi | ErrorCategory::Network | ErrorCategory::Unknown => {
                Self::RetryOperation
            }
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| Error::UnknownVariant {
                kind: "action",
                value: s.to_string(),
            })
    }
}

/// Remediation descriptor attached to a [`PatternRule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub action: ActionName,
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<ActionName>,
    #[serde(default)]
    pub requires_approval: bool,
}

impl ResolutionAction {
    pub fn new(action: ActionName, timeout_ms: u64) -> Self {
        Self {
            action,
            timeout_ms,
            rollback: None,
            requires_approval: false,
        }
    }

    #[must_use]
    pub fn with_rollback(mut self, rollback: ActionName) -> Self {
        self.rollback = Some(rollback);
        self
    }

    #[must_use]
    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }
}

/// Prior confidence for a rule with no recorded outcomes.
pub const PRIOR_CONFIDENCE: f64 = 0.5;

/// `success / (success + failure)`, or the prior with no history.
#[must_use]
pub fn confidence_from(success_count: u64, failure_count: u64) -> f64 {
    let total = success_count + failure_count;
    if total == 0 {
        PRIOR_CONFIDENCE
    } else {
        success_count as f64 / total as f64
    }
}

/// A reusable, confidence-weighted remediation definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<MatchCondition>,
    pub category: ErrorCategory,
    pub min_severity: Severity,
    pub action: ResolutionAction,
    #[serde(default)]
    pub occurrences: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_occurrence: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    pub confidence: f64,
    #[serde(default)]
    pub manual_override: u32,
    #[serde(default)]
    pub enabled: bool,
}

impl PatternRule {
    /// Create an enabled rule with no history.
    pub fn new(name: impl Into<String>, category: ErrorCategory, action: ResolutionAction) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            fingerprints: Vec::new(),
            conditions: Vec::new(),
            category,
            min_severity: Severity::Low,
            action,
            occurrences: 0,
            last_occurrence: None,
            success_count: 0,
            failure_count: 0,
            confidence: PRIOR_CONFIDENCE,
            manual_override: 0,
            enabled: true,
        }
    }

    #[must_use]
    pub fn with_fingerprints(mut self, fingerprints: Vec<String>) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<MatchCondition>) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_min_severity(mut self, min_severity: Severity) -> Self {
        self.min_severity = min_severity;
        self
    }

    /// Seed outcome history, recomputing confidence.
    #[must_use]
    pub fn with_history(mut self, success_count: u64, failure_count: u64) -> Self {
        self.success_count = success_count;
        self.failure_count = failure_count;
        self.recompute_confidence();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn recompute_confidence(&mut self) {
        self.confidence = confidence_from(self.success_count, self.failure_count);
    }

    /// Apply one resolution outcome to the counters.
    pub fn record_outcome(&mut self, success: bool, at: DateTime<Utc>) {
        if success {
            self.success_count += 1;
            self.occurrences += 1;
            self.last_occurrence = Some(at);
        } else {
            self.failure_count += 1;
        }
        self.recompute_confidence();
        self.updated_at = at;
    }
}

/// Result of scoring one rule against a signature. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub rule: PatternRule,
    /// Score in `[0.5, 1.0]`
    pub confidence: f64,
    pub matched_signals: Vec<String>,
    pub exact_fingerprint: bool,
}

/// What happened to the rollback action after a failed resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RollbackOutcome {
    NotDefined,
    Succeeded { action: ActionName },
    Failed { action: ActionName, error: String },
    Unregistered { action: ActionName },
}

/// Two-branch result of a resolution attempt, plus the two non-executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded {
        detail: String,
    },
    Failed {
        error: String,
        timed_out: bool,
        rollback: RollbackOutcome,
    },
    /// The rule requires human approval; nothing was run.
    AwaitingApproval,
    /// No implementation registered for the action; nothing was run.
    Unregistered,
}

/// Outcome attached to a [`FailureSignature`] after auto-resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub rule_id: Uuid,
    pub action: ActionName,
    pub outcome: ActionOutcome,
    pub duration_ms: u64,
    pub executed_at: DateTime<Utc>,
}

impl ResolutionOutcome {
    /// Whether the failure counts as resolved.
    ///
    /// An unregistered action is a success-path skip; an approval gate is not.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(
            self.outcome,
            ActionOutcome::Succeeded { .. } | ActionOutcome::Unregistered
        )
    }

    /// Whether an action ran and succeeded. Skips never resolve a failure.
    #[must_use]
    pub fn resolved(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Succeeded { .. })
    }

    /// Whether an action actually ran (and so feeds rule confidence).
    #[must_use]
    pub fn executed(&self) -> bool {
        matches!(
            self.outcome,
            ActionOutcome::Succeeded { .. } | ActionOutcome::Failed { .. }
        )
    }
}

/// Row written for every resolution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionLogEntry {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub signature_id: Uuid,
    pub fingerprint: String,
    pub action: ActionName,
    pub outcome: ActionOutcome,
    pub duration_ms: u64,
    pub logged_at: DateTime<Utc>,
}

impl ResolutionLogEntry {
    pub fn from_outcome(signature: &FailureSignature, outcome: &ResolutionOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            rule_id: outcome.rule_id,
            signature_id: signature.id,
            fingerprint: signature.fingerprint.clone(),
            action: outcome.action,
            outcome: outcome.outcome.clone(),
            duration_ms: outcome.duration_ms,
            logged_at: outcome.executed_at,
        }
    }
}

/// Why a failure was handed to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationReason {
    /// The matched rule is behind an approval gate
    ApprovalRequired,
    /// A critical failure was not auto-resolved
    CriticalUnresolved,
}

/// Row handed to operators for manual follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub signature_id: Uuid,
    pub fingerprint: String,
    pub reason: EscalationReason,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_category_round_trip_names() {
        for category in ErrorCategory::ALL {
            assert_eq!(category.as_str().parse::<ErrorCategory>().unwrap(), category);
        }
        assert_eq!(
            "external-api".parse::<ErrorCategory>().unwrap(),
            ErrorCategory::ExternalApi
        );
        assert!("bogus".parse::<ErrorCategory>().is_err());
    }

    #[test]
    fn test_action_name_parse() {
        assert_eq!(
            "reset_connection_pool".parse::<ActionName>().unwrap(),
            ActionName::ResetConnectionPool
        );
        assert!("drop_tables".parse::<ActionName>().is_err());
    }

    #[test]
    fn test_confidence_prior_and_ratio() {
        assert!((confidence_from(0, 0) - 0.5).abs() < f64::EPSILON);
        assert!((confidence_from(3, 1) - 0.75).abs() < f64::EPSILON);
        assert!(confidence_from(0, 4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_outcome_updates_counters() {
        let mut rule = PatternRule::new(
            "db reset",
            ErrorCategory::Database,
            ResolutionAction::new(ActionName::ResetConnectionPool, 1_000),
        );
        let at = Utc::now();
        rule.record_outcome(true, at);
        assert_eq!(rule.success_count, 1);
        assert_eq!(rule.occurrences, 1);
        assert_eq!(rule.last_occurrence, Some(at));
        assert!((rule.confidence - 1.0).abs() < f64::EPSILON);

        rule.record_outcome(false, at);
        assert_eq!(rule.failure_count, 1);
        assert_eq!(rule.occurrences, 1);
        assert!((rule.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_error_details_from_error() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let details = ErrorDetails::from_error(&err);
        assert_eq!(details.name, "Error");
        assert_eq!(details.message, "disk on fire");
    }

    #[test]
    fn test_resolution_outcome_success_semantics() {
        let mut outcome = ResolutionOutcome {
            rule_id: Uuid::new_v4(),
            action: ActionName::ClearCache,
            outcome: ActionOutcome::AwaitingApproval,
            duration_ms: 0,
            executed_at: Utc::now(),
        };
        assert!(!outcome.success());
        assert!(!outcome.executed());

        outcome.outcome = ActionOutcome::Unregistered;
        assert!(outcome.success());
        assert!(!outcome.executed());
        assert!(!outcome.resolved());

        outcome.outcome = ActionOutcome::Succeeded {
            detail: String::new(),
        };
        assert!(outcome.resolved());
    }
}
