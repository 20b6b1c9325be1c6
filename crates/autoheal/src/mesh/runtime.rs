//! Runtime layer: a table of named invariant checks.
//!
//! A check returning `Ok(false)` is a violation (high). A check returning an
//! error is reported separately as medium, since the invariant could not be
//! evaluated at all. A panicking check is reported the same way.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use sysinfo::System;
use tracing::{debug, warn};

use super::{LayerKind, ValidationIssue, ValidationLayer};
use crate::actions::ActionRegistry;
use crate::store::Store;
use crate::types::Severity;

type Check = Box<dyn Fn() -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// A named runtime invariant.
pub struct Invariant {
    name: String,
    description: String,
    check: Check,
}

impl Invariant {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            check: Box::new(move || check().boxed()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Evaluates registered invariants in order.
#[derive(Default)]
pub struct RuntimeLayer {
    invariants: Vec<Invariant>,
}

impl RuntimeLayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_invariant(mut self, invariant: Invariant) -> Self {
        self.invariants.push(invariant);
        self
    }

    /// The built-in table: store liveness, a non-empty action registry and
    /// memory usage under `memory_headroom` (a used/total ratio).
    #[must_use]
    pub fn builtin(store: Arc<dyn Store>, registry: Arc<ActionRegistry>, memory_headroom: f64) -> Self {
        Self::new()
            .with_invariant(Invariant::new(
                "store-responds",
                "The persistence store answers a liveness check",
                move || {
                    let store = store.clone();
                    async move { Ok(store.ping().await.is_ok()) }
                },
            ))
            .with_invariant(Invariant::new(
                "actions-registered",
                "At least one remediation action is registered",
                move || {
                    let registry = registry.clone();
                    async move { Ok(!registry.is_empty()) }
                },
            ))
            .with_invariant(Invariant::new(
                "memory-headroom",
                format!("Memory usage stays below {:.0}%", memory_headroom * 100.0),
                move || async move {
                    let mut sys = System::new();
                    sys.refresh_memory();
                    let total = sys.total_memory();
                    if total == 0 {
                        anyhow::bail!("total memory is unavailable on this platform");
                    }
                    Ok(sys.used_memory() as f64 / total as f64 <= memory_headroom)
                },
            ))
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}

#[async_trait]
impl ValidationLayer for RuntimeLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Runtime
    }

    fn fails_on_high(&self) -> bool {
        true
    }

    async fn validate(&self) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        for invariant in &self.invariants {
            let outcome = AssertUnwindSafe(async { (invariant.check)().await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(true)) => debug!(invariant = %invariant.name, "Invariant holds"),
                Ok(Ok(false)) => issues.push(ValidationIssue::new(
                    format!("invariant-{}", invariant.name),
                    Severity::High,
                    format!("Invariant violated: {}", invariant.name),
                    invariant.description.clone(),
                )),
                Ok(Err(e)) => issues.push(ValidationIssue::new(
                    format!("invariant-error-{}", invariant.name),
                    Severity::Medium,
                    format!("Invariant check failed: {}", invariant.name),
                    format!("{e:#}"),
                )),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    warn!(invariant = %invariant.name, "Invariant check panicked: {message}");
                    issues.push(ValidationIssue::new(
                        format!("invariant-error-{}", invariant.name),
                        Severity::Medium,
                        format!("Invariant check panicked: {}", invariant.name),
                        message,
                    ));
                }
            }
        }
        Ok(issues)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
