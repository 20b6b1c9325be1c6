//! Persistence layer for failures, patterns, resolution logs and escalations.
//!
//! The core treats the store as an opaque durable backend. Two operations
//! must be atomic in the backend itself: occurrence increment-and-touch and
//! pattern outcome counters. Nothing above this trait holds locks.

mod file;
mod memory;
mod tables;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::types::{
    ErrorCategory, Escalation, FailureSignature, PatternRule, ResolutionLogEntry,
};

/// Storage interface used by the capture pipeline, matcher, executor,
/// learner and validation layers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Get storage type identifier
    fn storage_type(&self) -> &'static str;

    /// Cheap liveness check
    async fn ping(&self) -> StoreResult<()>;

    // === Failure rows ===

    /// Most recently inserted row for a fingerprint
    async fn latest_failure(&self, fingerprint: &str) -> StoreResult<Option<FailureSignature>>;

    /// Insert a new failure row
    async fn insert_failure(&self, signature: &FailureSignature) -> StoreResult<()>;

    /// Atomically set the latest row's occurrence count to one more than the
    /// highest count stored for the fingerprint and move its `last_seen`
    /// forward. Returns the new count, or `None` with no row.
    async fn touch_occurrence(
        &self,
        fingerprint: &str,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<Option<u64>>;

    /// All failure rows, optionally restricted to one category
    async fn list_failures(
        &self,
        category: Option<ErrorCategory>,
    ) -> StoreResult<Vec<FailureSignature>>;

    // === Pattern rows ===

    async fn get_pattern(&self, id: Uuid) -> StoreResult<Option<PatternRule>>;

    async fn insert_pattern(&self, rule: &PatternRule) -> StoreResult<()>;

    /// Replace a pattern row by id
    async fn update_pattern(&self, rule: &PatternRule) -> StoreResult<()>;

    async fn list_patterns(&self) -> StoreResult<Vec<PatternRule>>;

    /// Enabled patterns in one category
    async fn enabled_patterns(&self, category: ErrorCategory) -> StoreResult<Vec<PatternRule>>;

    /// Atomically apply one resolution outcome to a pattern's counters and
    /// recompute its confidence. Returns the updated row.
    async fn record_pattern_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<PatternRule>;

    // === Resolution log and escalation rows ===

    async fn insert_resolution_log(&self, entry: &ResolutionLogEntry) -> StoreResult<()>;

    async fn list_resolution_logs(&self) -> StoreResult<Vec<ResolutionLogEntry>>;

    async fn insert_escalation(&self, escalation: &Escalation) -> StoreResult<()>;

    async fn list_escalations(&self) -> StoreResult<Vec<Escalation>>;
}
