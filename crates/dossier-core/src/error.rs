//! Error types for the dossier pipeline
//!
//! Provides error handling for:
//! - Bundle validation (no eligible cases, duplicates, malformed input)
//! - Rendering failures
//! - Storage failures (filesystem and plan store)
//! - Plan lookup and claim contention
//! - Configuration loading

use crate::types::{PlanId, PlanStatus};
use dossier_artifact::{ArtifactPath, HashError, PathError};
use std::path::PathBuf;

/// Convenience alias used throughout the crate
pub type Result<T, E = DossierError> = std::result::Result<T, E>;

/// Main dossier error type
#[derive(Debug, thiserror::Error)]
pub enum DossierError {
    /// Input rejected before any state change
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Markdown or auxiliary artifact could not be rendered
    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// Filesystem or plan store failure
    #[error("storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Plan unknown, or no signature manifest was ever produced
    #[error("not found: {0}")]
    NotFound(String),

    /// A reported artifact vanished before it could be signed
    #[error("artifact {path} missing for plan {plan_id}")]
    MissingArtifact { plan_id: PlanId, path: ArtifactPath },

    /// Another worker changed the plan first
    #[error("concurrency conflict on plan {plan_id}: expected {expected}, found {actual}")]
    ConcurrencyConflict {
        plan_id: PlanId,
        expected: PlanStatus,
        actual: PlanStatus,
    },

    /// Requested status change is not permitted
    #[error("illegal transition for plan {plan_id}: {from} -> {to}")]
    IllegalTransition {
        plan_id: PlanId,
        from: PlanStatus,
        to: PlanStatus,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Attempt exceeded its wall-clock budget
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

impl DossierError {
    /// Check if error is retryable with backoff
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Render(_) | Self::Storage(_) | Self::Timeout { .. }
        )
    }

    /// Short machine-readable category
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Render(_) => "render",
            Self::Storage(_) => "storage",
            Self::NotFound(_) => "not_found",
            Self::MissingArtifact { .. } => "missing_artifact",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Config(_) => "config",
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Plan-not-found helper
    #[inline]
    pub fn plan_not_found(plan_id: &PlanId) -> Self {
        Self::NotFound(format!("plan {plan_id}"))
    }
}

/// Input validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// No candidate passed the acceptance policy
    #[error("no eligible cases")]
    NoEligibleCases,

    /// Identical case set with identical rationale already queued
    #[error("duplicate bundle: matches existing plan {existing}")]
    DuplicateBundle { existing: PlanId },

    /// Plan must reference at least one case
    #[error("plan has an empty case set")]
    EmptyCaseSet,

    /// Malformed input
    #[error("malformed input: {0}")]
    Malformed(String),
}

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A section could not be produced
    #[error("section '{section}' failed: {message}")]
    Section { section: String, message: String },

    /// Case context lookup failed
    #[error("case context unavailable: {0}")]
    Context(String),

    /// JSON encoding failed
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generated path was not a valid artifact path
    #[error("invalid artifact path: {0}")]
    Path(#[from] PathError),
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Filesystem IO failure
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Plan store database failure
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Persisted JSON could not be read back
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Reported size disagrees with the file on disk
    #[error("size mismatch for {path}: reported {reported}, on disk {actual}")]
    SizeMismatch {
        path: ArtifactPath,
        reported: u64,
        actual: u64,
    },

    /// Manifest references an unsupported algorithm or invalid hash
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Path on disk could not be mapped to an artifact path
    #[error("invalid artifact path: {0}")]
    Path(#[from] PathError),
}

impl StorageError {
    /// IO error helper carrying the offending path
    #[inline]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML was malformed
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
