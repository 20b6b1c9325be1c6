//! # Autoheal
//!
//! Failure capture and self-remediation for an embedding application.
//!
//! This crate provides:
//! - Deterministic fingerprinting and classification of raw failures
//! - Occurrence tracking against a persistence store
//! - Confidence-scored matching against a library of remediation rules
//! - Time-bounded remediation with rollback and a confidence feedback loop
//! - Rule learning from clusters of historical failures
//! - A validation mesh of concurrent health-check layers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use autoheal::{ActionRegistry, CaptureRequest, FailureCapture, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let registry = Arc::new(ActionRegistry::builder().build());
//! let capture = FailureCapture::new(store, registry);
//!
//! let signature = capture.capture(CaptureRequest::new(error, context)).await;
//! ```

// Data model
pub mod types;

// Error types
pub mod error;

// Configuration
pub mod config;

// Persistence
pub mod store;

// Capture pipeline
pub mod capture;
pub mod classifier;
pub mod fingerprint;

// Remediation
pub mod actions;
pub mod executor;
pub mod learner;
pub mod matcher;

// Health checks
pub mod mesh;
pub mod report;

// Re-export key types for convenience
pub use actions::{ActionRegistry, CommandAction, FnAction, RemediationAction};
pub use capture::{CaptureRequest, FailureCapture};
pub use config::AutohealConfig;
pub use error::{ConfigError, Error, Result, StoreError};
pub use executor::ResolutionExecutor;
pub use learner::PatternLearner;
pub use matcher::PatternMatcher;
pub use mesh::{LayerKind, LayerStatus, MeshResult, ValidationLayer, ValidationMesh};
pub use report::HealthReport;
pub use store::{JsonFileStore, MemoryStore, Store};
pub use types::{
    ActionName, ErrorCategory, ErrorDetails, FailureContext, FailureSignature, Method,
    PatternRule, Severity,
};
