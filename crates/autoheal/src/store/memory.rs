//! In-process store backed by `RwLock`-guarded tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::tables::Tables;
use super::Store;
use crate::error::StoreResult;
use crate::types::{
    ErrorCategory, Escalation, FailureSignature, PatternRule, ResolutionLogEntry,
};

/// Volatile store. Each mutation runs under a single write lock, which makes
/// the increment and counter operations atomic within the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pattern rules.
    #[must_use]
    pub fn with_patterns(patterns: Vec<PatternRule>) -> Self {
        Self {
            tables: RwLock::new(Tables {
                patterns,
                ..Tables::default()
            }),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn storage_type(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn latest_failure(&self, fingerprint: &str) -> StoreResult<Option<FailureSignature>> {
        Ok(self.tables.read().await.latest_failure(fingerprint).cloned())
    }

    async fn insert_failure(&self, signature: &FailureSignature) -> StoreResult<()> {
        self.tables.write().await.failures.push(signature.clone());
        Ok(())
    }

    async fn touch_occurrence(
        &self,
        fingerprint: &str,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<Option<u64>> {
        Ok(self
            .tables
            .write()
            .await
            .touch_occurrence(fingerprint, seen_at))
    }

    async fn list_failures(
        &self,
        category: Option<ErrorCategory>,
    ) -> StoreResult<Vec<FailureSignature>> {
        Ok(self.tables.read().await.failures_in(category))
    }

    async fn get_pattern(&self, id: Uuid) -> StoreResult<Option<PatternRule>> {
        Ok(self.tables.read().await.pattern(id).cloned())
    }

    async fn insert_pattern(&self, rule: &PatternRule) -> StoreResult<()> {
        self.tables.write().await.patterns.push(rule.clone());
        Ok(())
    }

    async fn update_pattern(&self, rule: &PatternRule) -> StoreResult<()> {
        self.tables.write().await.update_pattern(rule)
    }

    async fn list_patterns(&self) -> StoreResult<Vec<PatternRule>> {
        Ok(self.tables.read().await.patterns.clone())
    }

    async fn enabled_patterns(&self, category: ErrorCategory) -> StoreResult<Vec<PatternRule>> {
        Ok(self.tables.read().await.enabled_patterns(category))
    }

    async fn record_pattern_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<PatternRule> {
        self.tables
            .write()
            .await
            .record_pattern_outcome(id, success, at)
    }

    async fn insert_resolution_log(&self, entry: &ResolutionLogEntry) -> StoreResult<()> {
        self.tables.write().await.resolution_logs.push(entry.clone());
        Ok(())
    }

    async fn list_resolution_logs(&self) -> StoreResult<Vec<ResolutionLogEntry>> {
        Ok(self.tables.read().await.resolution_logs.clone())
    }

    async fn insert_escalation(&self, escalation: &Escalation) -> StoreResult<()> {
        self.tables.write().await.escalations.push(escalation.clone());
        Ok(())
    }

    async fn list_escalations(&self) -> StoreResult<Vec<Escalation>> {
        Ok(self.tables.read().await.escalations.clone())
    }
}
