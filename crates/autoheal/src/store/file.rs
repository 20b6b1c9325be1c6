//! File-based store implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::tables::Tables;
use super::Store;
use crate::error::{StoreError, StoreResult};
use crate::types::{
    ErrorCategory, Escalation, FailureSignature, PatternRule, ResolutionLogEntry,
};

/// Durable store that keeps the whole database in one JSON document.
///
/// Tables are loaded once on open. Every mutation holds the mutex across the
/// in-memory change and the write-back, so increments are never interleaved.
/// The document is replaced atomically (temp file + rename).
pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Open (or lazily create) a store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Tables::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(StoreError::Read {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        };

        debug!(
            path = %path.display(),
            failures = tables.failures.len(),
            patterns = tables.patterns.len(),
            "Opened JSON file store"
        );

        Ok(Self {
            path,
            tables: Mutex::new(tables),
        })
    }

    /// Get the backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, tables: &Tables) -> StoreResult<()> {
        let write_err = |e: std::io::Error| StoreError::Write {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(write_err)?;
            }
        }

        let content = serde_json::to_string_pretty(tables)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await.map_err(write_err)?;
        fs::rename(&tmp, &self.path).await.map_err(write_err)
    }

    /// Apply a mutation and write the document back. The in-memory change is
    /// reverted if the write fails.
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut tables = self.tables.lock().await;
        let snapshot = tables.clone();
        let value = f(&mut tables)?;
        if let Err(e) = self.persist(&tables).await {
            *tables = snapshot;
            return Err(e);
        }
        Ok(value)
    }
}

#[async_trait]
impl Store for JsonFileStore {
    fn storage_type(&self) -> &'static str {
        "json-file"
    }

    async fn ping(&self) -> StoreResult<()> {
        let tables = self.tables.lock().await;
        self.persist(&tables).await
    }

    async fn latest_failure(&self, fingerprint: &str) -> StoreResult<Option<FailureSignature>> {
        Ok(self.tables.lock().await.latest_failure(fingerprint).cloned())
    }

    async fn insert_failure(&self, signature: &FailureSignature) -> StoreResult<()> {
        self.mutate(|t| {
            t.failures.push(signature.clone());
            Ok(())
        })
        .await
    }

    async fn touch_occurrence(
        &self,
        fingerprint: &str,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<Option<u64>> {
        self.mutate(|t| Ok(t.touch_occurrence(fingerprint, seen_at)))
            .await
    }

    async fn list_failures(
        &self,
        category: Option<ErrorCategory>,
    ) -> StoreResult<Vec<FailureSignature>> {
        Ok(self.tables.lock().await.failures_in(category))
    }

    async fn get_pattern(&self, id: Uuid) -> StoreResult<Option<PatternRule>> {
        Ok(self.tables.lock().await.pattern(id).cloned())
    }

    async fn insert_pattern(&self, rule: &PatternRule) -> StoreResult<()> {
        self.mutate(|t| {
            t.patterns.push(rule.clone());
            Ok(())
        })
        .await
    }

    async fn update_pattern(&self, rule: &PatternRule) -> StoreResult<()> {
        self.mutate(|t| t.update_pattern(rule)).await
    }

    async fn list_patterns(&self) -> StoreResult<Vec<PatternRule>> {
        Ok(self.tables.lock().await.patterns.clone())
    }

    async fn enabled_patterns(&self, category: ErrorCategory) -> StoreResult<Vec<PatternRule>> {
        Ok(self.tables.lock().await.enabled_patterns(category))
    }

    async fn record_pattern_outcome(
        &self,
        id: Uuid,
        success: bool,
        at: DateTime<Utc>,
    ) -> StoreResult<PatternRule> {
        self.mutate(|t| t.record_pattern_outcome(id, success, at))
            .await
    }

    async fn insert_resolution_log(&self, entry: &ResolutionLogEntry) -> StoreResult<()> {
        self.mutate(|t| {
            t.resolution_logs.push(entry.clone());
            Ok(())
        })
        .await
    }

    async fn list_resolution_logs(&self) -> StoreResult<Vec<ResolutionLogEntry>> {
        Ok(self.tables.lock().await.resolution_logs.clone())
    }

    async fn insert_escalation(&self, escalation: &Escalation) -> StoreResult<()> {
        self.mutate(|t| {
            t.escalations.push(escalation.clone());
            Ok(())
        })
        .await
    }

    async fn list_escalations(&self) -> StoreResult<Vec<Escalation>> {
        Ok(self.tables.lock().await.escalations.clone())
    }
}
