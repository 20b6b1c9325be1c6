//! Static layer: configuration and pattern-library sanity.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use super::{LayerKind, ValidationIssue, ValidationLayer};
use crate::actions::ActionRegistry;
use crate::config::AutohealConfig;
use crate::store::Store;
use crate::types::{ConditionOperator, Severity};

/// Checks loaded configuration, required environment and stored rules.
pub struct StaticLayer {
    config: AutohealConfig,
    store: Arc<dyn Store>,
    registry: Arc<ActionRegistry>,
}

impl StaticLayer {
    #[must_use]
    pub fn new(config: AutohealConfig, store: Arc<dyn Store>, registry: Arc<ActionRegistry>) -> Self {
        Self {
            config,
            store,
            registry,
        }
    }
}

#[async_trait]
impl ValidationLayer for StaticLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Static
    }

    fn fails_on_high(&self) -> bool {
        true
    }

    async fn validate(&self) -> Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        for (i, problem) in self.config.validate().iter().enumerate() {
            issues.push(ValidationIssue::new(
                format!("config-invalid-{i}"),
                Severity::High,
                "Invalid configuration value",
                problem.to_string(),
            ));
        }

        for name in &self.config.mesh.required_env {
            if std::env::var_os(name).is_none() {
                issues.push(ValidationIssue::new(
                    format!("env-missing-{name}"),
                    Severity::Critical,
                    "Required environment variable is not set",
                    format!("{name} must be set"),
                ));
            }
        }

        for rule in self.store.list_patterns().await? {
            for condition in &rule.conditions {
                if condition.operator != ConditionOperator::Matches {
                    continue;
                }
                let valid = condition
                    .value
                    .as_str()
                    .is_some_and(|pattern| Regex::new(pattern).is_ok());
                if !valid {
                    issues.push(ValidationIssue::new(
                        format!("pattern-regex-{}", rule.id),
                        Severity::High,
                        "Pattern condition has an invalid regex",
                        format!(
                            "Rule '{}' condition on '{}' can never match: {}",
                            rule.name, condition.field, condition.value
                        ),
                    ));
                }
            }

            if !rule.enabled {
                continue;
            }

            let unregistered: Vec<String> = std::iter::once(rule.action.action)
                .chain(rule.action.rollback)
                .filter(|name| !self.registry.contains(*name))
                .map(|name| name.to_string())
                .collect();
            if !unregistered.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("pattern-action-{}", rule.id),
                    Severity::Medium,
                    "Enabled rule uses an unregistered action",
                    format!(
                        "Rule '{}' references {} with no implementation",
                        rule.name,
                        unregistered.join(", ")
                    ),
                ));
            }

            if rule.fingerprints.is_empty() && rule.conditions.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("pattern-empty-{}", rule.id),
                    Severity::Low,
                    "Enabled rule can never match",
                    format!("Rule '{}' has neither fingerprints nor conditions", rule.name),
                ));
            }
        }

        Ok(issues)
    }
}
