//! In-memory table set shared by the memory and file backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::{
    ErrorCategory, Escalation, FailureSignature, PatternRule, ResolutionLogEntry,
};

/// Every row the subsystem persists. Serialized as-is by [`super::JsonFileStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(default)]
    pub failures: Vec<FailureSignature>,
    #[serde(default)]
    pub patterns: Vec<PatternRule>,
    #[serde(default)]
    pub resolution_logs: Vec<ResolutionLogEntry>,
    #[serde(default)]
    pub escalations: Vec<Escalation>,
}

impl Tables {
    pub fn latest_failure(&self, fingerprint: &str) -> Option<&FailureSignature> {
        self.failures
            .iter()
            .rev()
            .find(|f| f.fingerprint == fingerprint)
    }

    /// Continue from the highest count of any row with this fingerprint.
    ///
    /// Concurrent captures may insert their rows out of order, so the latest
    /// row can carry a stale count.
    pub fn touch_occurrence(&mut self, fingerprint: &str, seen_at: DateTime<Utc>) -> Option<u64> {
        let highest = self
            .failures
            .iter()
            .filter(|f| f.fingerprint == fingerprint)
            .map(|f| f.occurrence_count)
            .max()?;
        let row = self
            .failures
            .iter_mut()
            .rev()
            .find(|f| f.fingerprint == fingerprint)?;
        row.occurrence_count = highest + 1;
        if seen_at > row.last_seen {
            row.last_seen = seen_at;
        }
        Some(row.occurrence_count)
    }

    pub fn failures_in(&self, category: Option<ErrorCategory>) -> Vec<FailureSignature> {
        self.failures
            .iter()
            .filter(|f| match category {
                Some(c) => f.category == c,
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn pattern(&self, id: Uuid) -> Option<&PatternRule> {
        self.patterns.iter().find(|p| p.id == id)
    }

    pub fn update_pattern(&mut self, rule: &PatternRule) -> StoreResult<()> {
        let row = self
            .patterns
            .iter_mut()
            .find(|p| p.id == rule.id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "pattern",
                id: rule.id.to_string(),
            })?;
        *row = rule.clone();
        Ok(())
    }

    pub fn enabled_patterns(&self, category: ErrorCategory) -> Vec<PatternRule> {
        self.patterns
            .iter()
            .filter(|p| p.enabled && p.category == category)
            .cloned()
            .collect()
    }

    pub fn record_pattern_outcome(
        &mut self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<PatternRule> {
        let row = self
            .patterns
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "pattern",
                id: id.to_string(),
            })?;
        row.record_outcome(success, at);
        Ok(row.clone())
    }
}
