//! Error types for the docnorm library.
//!
//! Two distinct failure surfaces reflect two distinct policies:
//!
//! * [`DocNormError`] — returned as `Err` from library entry points.
//!   `NotFound` and `Validation` are caller errors and carry no side effects;
//!   `ExternalService` aborts the enclosing normalization run because a
//!   partial document is not a safe output.
//!
//! * Per-entity failures inside a document-wide batch correction are **data**,
//!   not errors: they are collected in
//!   [`crate::corrections::BatchOutcome::failures`] so the remaining entities
//!   still proceed and the caller gets a full report.
//!
//! Structural corruption after the external rewrite (missing boundary
//! markers) never surfaces here at all — the marker protocol recovers with
//! degraded fidelity and a `tracing` warning instead of failing the run.

use std::path::PathBuf;
use thiserror::Error;

use crate::entity::EntityId;
use crate::services::ServiceError;

/// All fatal errors returned by the docnorm library.
#[derive(Debug, Error)]
pub enum DocNormError {
    // ── Caller errors ─────────────────────────────────────────────────────
    /// Entity id is absent from the manifest.
    #[error("entity {id} not found in manifest")]
    EntityNotFound { id: EntityId },

    /// Manifest entry exists but its backing content could not be located.
    #[error("content for entity {id} not found: '{path}'")]
    ContentNotFound { id: EntityId, path: PathBuf },

    /// The document directory has no manifest.
    #[error("manifest not found: '{path}'")]
    ManifestNotFound { path: PathBuf },

    /// The merged document is missing from the document directory.
    #[error("merged document not found: '{path}'")]
    DocumentNotFound { path: PathBuf },

    /// Malformed request: invalid correction kind, missing required field,
    /// malformed id, malformed persisted file.
    #[error("validation error: {0}")]
    Validation(String),

    // ── External services ─────────────────────────────────────────────────
    /// A rewrite or vision call failed or timed out. Propagated immediately;
    /// never retried (replaying a generative call risks non-idempotent
    /// duplicate effects).
    #[error("external service failure: {0}")]
    ExternalService(#[from] ServiceError),

    /// A chunk failed mid-run; the run is aborted and no output is written.
    #[error("normalization aborted: chunk {chunk}/{total} failed: {source}")]
    ChunkFailed {
        chunk: usize,
        total: usize,
        #[source]
        source: ServiceError,
    },

    // ── I/O & config ──────────────────────────────────────────────────────
    /// Filesystem error with path context.
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
