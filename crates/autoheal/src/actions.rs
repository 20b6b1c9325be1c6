//! Remediation action registry.
//!
//! A fixed, immutable map from [`ActionName`] to an implementation, built once
//! at process start and passed into the executor. The core calls actions
//! strictly by name; there is no discovery at runtime.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::CommandSpec;
use crate::types::{ActionName, FailureSignature};

/// A remediation function.
///
/// Implementations may be abandoned mid-flight when they exceed their timeout,
/// so they must be idempotent and keep their failure path side-effect-light.
#[async_trait]
pub trait RemediationAction: Send + Sync {
    /// Run the remediation. The returned string is a human-readable detail.
    async fn run(&self, signature: &FailureSignature) -> Result<String>;
}

/// Adapter for async closures.
pub struct FnAction<F> {
    f: F,
}

impl<F> FnAction<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> RemediationAction for FnAction<F>
where
    F: Fn(FailureSignature) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String>> + Send,
{
    async fn run(&self, signature: &FailureSignature) -> Result<String> {
        (self.f)(signature.clone()).await
    }
}

/// Runs an external command with the signature as JSON on stdin.
///
/// `AUTOHEAL_FINGERPRINT` and `AUTOHEAL_CATEGORY` are set in its environment.
/// A non-zero exit status is a failure.
pub struct CommandAction {
    spec: CommandSpec,
}

impl CommandAction {
    #[must_use]
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl RemediationAction for CommandAction {
    async fn run(&self, signature: &FailureSignature) -> Result<String> {
        let payload = serde_json::to_vec(signature).context("Failed to serialize signature")?;

        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .env("AUTOHEAL_FINGERPRINT", &signature.fingerprint)
            .env("AUTOHEAL_CATEGORY", signature.category.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.spec.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&payload)
                .await
                .context("Failed to write signature to stdin")?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", self.spec.program))?;

        debug!(
            program = %self.spec.program,
            status = %output.status,
            "Remediation command finished"
        );

        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.spec.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Immutable name → implementation map.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<ActionName, Arc<dyn RemediationAction>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Build a registry of [`CommandAction`]s from configuration.
    #[must_use]
    pub fn from_commands(commands: &BTreeMap<ActionName, CommandSpec>) -> Self {
        commands
            .iter()
            .fold(Self::builder(), |builder, (name, spec)| {
                builder.register(*name, CommandAction::new(spec.clone()))
            })
            .build()
    }

    pub fn get(&self, name: ActionName) -> Option<Arc<dyn RemediationAction>> {
        self.actions.get(&name).cloned()
    }

    pub fn contains(&self, name: ActionName) -> bool {
        self.actions.contains_key(&name)
    }

    /// Registered names in declaration order.
    pub fn names(&self) -> Vec<ActionName> {
        let mut names: Vec<_> = self.actions.keys().copied().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

/// Collects implementations before freezing them into an [`ActionRegistry`].
#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<ActionName, Arc<dyn RemediationAction>>,
}

impl ActionRegistryBuilder {
    /// Register an implementation, replacing any earlier one for `name`.
    #[must_use]
    pub fn register(mut self, name: ActionName, action: impl RemediationAction + 'static) -> Self {
        self.actions.insert(name, Arc::new(action));
        self
    }

    /// Register an async closure.
    #[must_use]
    pub fn register_fn<F, Fut>(self, name: ActionName, f: F) -> Self
    where
        F: Fn(FailureSignature) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        self.register(name, FnAction::new(f))
    }

    #[must_use]
    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{
        ErrorCategory, ErrorDetails, FailureContext, Method, Severity, SystemState,
    };
    use chrono::Utc;
    use uuid::Uuid;

    pub(crate) fn sample_signature() -> FailureSignature {
        let now = Utc::now();
        FailureSignature {
            id: Uuid::new_v4(),
            fingerprint: "0123456789abcdef".to_string(),
            timestamp: now,
            category: ErrorCategory::Network,
            severity: Severity::Low,
            context: FailureContext::new("/api/orders", Method::Get),
            error: ErrorDetails::new("Error", "ECONNRESET"),
            system_state: SystemState::default(),
            resolution: None,
            occurrence_count: 1,
            first_seen: now,
            last_seen: now,
        }
    }

    #[tokio::test]
    async fn test_builder_registers_closures() {
        let registry = ActionRegistry::builder()
            .register_fn(ActionName::RetryOperation, |sig: FailureSignature| async move {
                Ok(format!("retried {}", sig.fingerprint))
            })
            .build();

        assert!(registry.contains(ActionName::RetryOperation));
        assert!(!registry.contains(ActionName::ClearCache));
        assert_eq!(registry.len(), 1);

        let action = registry.get(ActionName::RetryOperation).unwrap();
        let detail = action.run(&sample_signature()).await.unwrap();
        assert_eq!(detail, "retried 0123456789abcdef");
    }

    #[test]
    fn test_from_commands() {
        let mut commands = BTreeMap::new();
        commands.insert(
            ActionName::ClearCache,
            CommandSpec {
                program: "true".to_string(),
                args: vec![],
            },
        );
        let registry = ActionRegistry::from_commands(&commands);
        assert_eq!(registry.names(), vec![ActionName::ClearCache]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_reads_stdin_and_env() {
        let action = CommandAction::new(CommandSpec {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                "cat >/dev/null; echo \"fixed $AUTOHEAL_CATEGORY\"".to_string(),
            ],
        });
        let detail = action.run(&sample_signature()).await.unwrap();
        assert_eq!(detail, "fixed network");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_action_nonzero_exit_fails() {
        let action = CommandAction::new(CommandSpec {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo nope >&2; exit 3".to_string()],
        });
        let err = action.run(&sample_signature()).await.unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
