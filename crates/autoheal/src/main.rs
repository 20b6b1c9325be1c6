//! Autoheal CLI
//!
//! Operator entry point for the failure capture pipeline, the pattern
//! library and the validation mesh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use autoheal::learner::PatternLearner;
use autoheal::mesh::{AuditLayer, RuntimeLayer, StateLayer, StaticLayer, ValidationResult};
use autoheal::report::{HealthReport, PipelineStats};
use autoheal::{
    ActionRegistry, AutohealConfig, CaptureRequest, ErrorCategory, ErrorDetails, FailureCapture,
    FailureContext, JsonFileStore, LayerKind, LayerStatus, MeshResult, Method, PatternRule,
    Severity, Store, ValidationMesh,
};

/// Failure capture, self-remediation and health validation
#[derive(Parser)]
#[command(name = "autoheal")]
#[command(about = "Failure capture, self-remediation and health validation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the JSON config file
    #[arg(long, env = "AUTOHEAL_CONFIG", default_value = "autoheal.json", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log format (logs go to stderr)
    #[arg(long, default_value = "text", global = true)]
    log_format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one failure through the full pipeline
    Capture {
        /// Error type name
        #[arg(long)]
        name: String,

        /// Error message
        #[arg(long)]
        message: String,

        /// File containing the stack trace
        #[arg(long)]
        stack_file: Option<PathBuf>,

        /// Machine-readable error code
        #[arg(long)]
        code: Option<String>,

        /// Route or operation identifier
        #[arg(long)]
        route: String,

        /// Operation kind (GET, POST, ..., JOB, EVENT)
        #[arg(long, default_value = "GET")]
        method: Method,

        /// Request payload as JSON (sensitive keys are redacted)
        #[arg(long)]
        payload: Option<String>,

        /// Override the classified category
        #[arg(long)]
        category: Option<ErrorCategory>,

        /// Override the derived severity
        #[arg(long)]
        severity: Option<Severity>,
    },

    /// Run the validation mesh
    Mesh {
        /// Run a single layer (static, runtime, state, audit)
        #[arg(long)]
        layer: Option<LayerKind>,
    },

    /// Learn new (disabled) patterns from stored failures
    Learn {
        /// Restrict learning to one category
        #[arg(long)]
        category: Option<ErrorCategory>,
    },

    /// Curate the pattern library
    Patterns {
        #[command(subcommand)]
        action: PatternCommands,
    },

    /// Run the mesh and the learner, then print the health report
    Report,
}

#[derive(Subcommand)]
enum PatternCommands {
    /// List every pattern
    List,
    /// Enable a reviewed pattern
    Enable { id: Uuid },
    /// Disable a pattern
    Disable { id: Uuid },
}

/// Everything a command needs, built once from configuration.
struct App {
    config: AutohealConfig,
    store: Arc<dyn Store>,
    registry: Arc<ActionRegistry>,
}

impl App {
    async fn load(config_path: &Path) -> Result<Self> {
        let config = AutohealConfig::load(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
        for problem in config.validate() {
            warn!("{problem}");
        }

        let store = JsonFileStore::open(&config.store.path)
            .await
            .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
        let registry = ActionRegistry::from_commands(&config.actions);
        info!(
            store = %store.path().display(),
            actions = registry.len(),
            "Loaded autoheal"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            registry: Arc::new(registry),
        })
    }

    fn mesh(&self) -> ValidationMesh {
        ValidationMesh::new()
            .with_layer(StaticLayer::new(
                self.config.clone(),
                self.store.clone(),
                self.registry.clone(),
            ))
            .with_layer(RuntimeLayer::builtin(
                self.store.clone(),
                self.registry.clone(),
                self.config.mesh.memory_headroom,
            ))
            .with_layer(StateLayer::new(self.store.clone()))
            .with_layer(AuditLayer::from_config(&self.config.mesh.audit_sources))
    }

    fn learner(&self) -> PatternLearner {
        PatternLearner::new(self.store.clone(), self.config.learner.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let app = App::load(&cli.config).await?;
    let healthy = match cli.command {
        Commands::Capture {
            name,
            message,
            stack_file,
            code,
            route,
            method,
            payload,
            category,
            severity,
        } => {
            let mut error = ErrorDetails::new(name, message);
            if let Some(path) = stack_file {
                let stack = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read stack file {}", path.display()))?;
                error = error.with_stack(stack);
            }
            if let Some(code) = code {
                error = error.with_code(code);
            }

            let mut context = FailureContext::new(route, method);
            if let Some(raw) = payload {
                let value = serde_json::from_str(&raw).context("--payload is not valid JSON")?;
                context = context.with_payload(value);
            }

            let mut request = CaptureRequest::new(error, context);
            request.category = category;
            request.severity = severity;

            let capture =
                FailureCapture::from_config(app.store.clone(), app.registry.clone(), &app.config);
            let signature = capture.capture(request).await;

            match cli.format {
                OutputFormat::Json => print_json(&signature)?,
                OutputFormat::Text => {
                    println!("{} {}", "Fingerprint:".bold(), signature.fingerprint.cyan());
                    println!("  category:    {}", signature.category);
                    println!("  severity:    {}", severity_label(signature.severity));
                    println!("  occurrences: {}", signature.occurrence_count);
                    println!("  first seen:  {}", signature.first_seen);
                    match &signature.resolution {
                        Some(r) if r.resolved() => {
                            println!("  resolution:  {} via {}", "resolved".green(), r.action);
                        }
                        Some(r) => println!("  resolution:  {} via {}", "unresolved".red(), r.action),
                        None => println!("  resolution:  {}", "no matching pattern".bright_black()),
                    }
                }
            }
            true
        }

        Commands::Mesh { layer: Some(kind) } => {
            let mesh = app.mesh();
            let result = mesh
                .run_layer(kind)
                .await
                .with_context(|| format!("No {kind} layer is registered"))?;
            match cli.format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => print_layer(&result),
            }
            result.status != LayerStatus::Fail
        }

        Commands::Mesh { layer: None } => {
            let result = app.mesh().run_all().await;
            match cli.format {
                OutputFormat::Json => print_json(&result)?,
                OutputFormat::Text => print_mesh(&result),
            }
            result.passed
        }

        Commands::Learn { category } => {
            let learner = app.learner();
            let learned = match category {
                Some(category) => learner.learn_from_store(category).await?,
                None => learner.learn_all().await?,
            };
            match cli.format {
                OutputFormat::Json => print_json(&learned)?,
                OutputFormat::Text => {
                    if learned.is_empty() {
                        println!("No new patterns learned");
                    }
                    for rule in &learned {
                        print_pattern(rule);
                    }
                }
            }
            true
        }

        Commands::Patterns { action } => {
            run_patterns(app.store.as_ref(), action, cli.format).await?;
            true
        }

        Commands::Report => {
            let started = Instant::now();
            let mesh = app.mesh().run_all().await;
            let learned = app.learner().learn_all().await?;
            let stats = PipelineStats::collect(app.store.as_ref()).await?;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let report = HealthReport::new(&mesh, stats, learned.len(), duration_ms);

            match cli.format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => report.print_summary(),
            }
            report.passed
        }
    };

    if !healthy {
        std::process::exit(1);
    }
    Ok(())
}

fn init_tracing(verbose: bool, format: OutputFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("autoheal=debug,info")
        } else {
            EnvFilter::new("autoheal=info,warn")
        }
    });

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        OutputFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        OutputFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn run_patterns(store: &dyn Store, action: PatternCommands, format: OutputFormat) -> Result<()> {
    match action {
        PatternCommands::List => {
            let patterns = store.list_patterns().await?;
            match format {
                OutputFormat::Json => print_json(&patterns)?,
                OutputFormat::Text => {
                    if patterns.is_empty() {
                        println!("No patterns stored");
                    }
                    for rule in &patterns {
                        print_pattern(rule);
                    }
                }
            }
        }
        PatternCommands::Enable { id } | PatternCommands::Disable { id } => {
            let enable = matches!(action, PatternCommands::Enable { .. });
            let mut rule = store
                .get_pattern(id)
                .await?
                .with_context(|| format!("Pattern {id} not found"))?;
            rule.enabled = enable;
            if enable {
                rule.manual_override += 1;
            }
            rule.updated_at = Utc::now();
            store.update_pattern(&rule).await?;
            info!(rule_id = %id, enabled = enable, "Updated pattern");

            match format {
                OutputFormat::Json => print_json(&rule)?,
                OutputFormat::Text => print_pattern(&rule),
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Critical => severity.as_str().red().bold(),
        Severity::High => severity.as_str().red(),
        Severity::Medium => severity.as_str().yellow(),
        Severity::Low => severity.as_str().bright_black(),
    }
}

fn status_label(status: LayerStatus) -> colored::ColoredString {
    match status {
        LayerStatus::Pass => "✓ PASS".green(),
        LayerStatus::Warn => "⚠ WARN".yellow(),
        LayerStatus::Fail => "✗ FAIL".red().bold(),
    }
}

fn print_pattern(rule: &PatternRule) {
    let state = if rule.enabled {
        "enabled".green()
    } else {
        "disabled".bright_black()
    };
    println!("{} {} [{}]", rule.id.to_string().cyan(), rule.name.bold(), state);
    println!(
        "    {} → {}  confidence {:.2} ({} ok / {} failed)  fingerprints {}  conditions {}",
        rule.category,
        rule.action.action,
        rule.confidence,
        rule.success_count,
        rule.failure_count,
        rule.fingerprints.len(),
        rule.conditions.len()
    );
}

fn print_layer(result: &ValidationResult) {
    println!(
        "{:<8} {}  ({} issues, {}ms)",
        result.layer.as_str().bold(),
        status_label(result.status),
        result.issues.len(),
        result.duration_ms
    );
    for issue in &result.issues {
        let fix = if issue.auto_fixable { " [auto-fixable]" } else { "" };
        println!(
            "    {} {}: {}{}",
            severity_label(issue.severity),
            issue.title,
            issue.description,
            fix.bright_black()
        );
    }
}

fn print_mesh(result: &MeshResult) {
    println!();
    println!("{}", "Validation mesh".cyan().bold());
    println!("{}", "═".repeat(60).bright_black());
    for layer in &result.results {
        print_layer(layer);
    }
    for conflict in result.conflicts() {
        println!("{} {}", "⚠".yellow(), conflict.detail);
    }
    println!("{}", "═".repeat(60).bright_black());
    println!("Confidence: {:.1}%", result.confidence * 100.0);
    for rec in &result.recommendations {
        println!("  {} {rec}", "→".cyan());
    }
    if result.passed {
        println!("{}", "✓ Mesh passed".green().bold());
    } else {
        println!("{}", "✗ Mesh failed".red().bold());
    }
}
