//! Contracts for the external collaborators this crate consumes.
//!
//! The extraction, vision, rewrite, and render steps are implemented
//! elsewhere; this crate only defends its own invariants against them.
//! Keeping them as traits means every test can drive the pipeline with a
//! deterministic stub instead of a network call.
//!
//! None of these traits retries: a generative call is not idempotent, so
//! replaying one on error risks duplicate effects. Timeouts belong to the
//! transport behind each implementation (see [`openai::OpenAiRewrite`]).

pub mod openai;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::EntityType;

pub use openai::OpenAiRewrite;

/// Failure of an external service call. Wrapped into
/// [`crate::error::DocNormError::ExternalService`] at the library boundary.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The provider returned an application-level error.
    #[error("{provider} API error: {message}")]
    ApiError { provider: String, message: String },

    /// Transport-level failure (connection, TLS, serialization).
    #[error("{provider} transport error: {message}")]
    Transport { provider: String, message: String },

    /// The call exceeded the configured transport timeout.
    #[error("{provider} call timed out after {secs}s")]
    Timeout { provider: String, secs: u64 },

    /// The provider is not configured (missing API key etc.).
    #[error("{provider} is not configured: {hint}")]
    NotConfigured { provider: String, hint: String },
}

/// Response from one rewrite call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteResponse {
    /// Raw response text (may carry a fence wrapper and a change-log
    /// section; the orchestrator splits those off).
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Free-text rewrite service (the "judge").
///
/// The contract is deliberately weak: the service receives a system
/// instruction plus placeholder-marked text and returns corrected text with
/// an optional change log. It is *not* obligated to preserve arbitrary
/// tokens — [`crate::marker`] exists to defend structure against exactly
/// that.
#[async_trait]
pub trait RewriteService: Send + Sync {
    async fn rewrite(&self, system: &str, user: &str) -> Result<RewriteResponse, ServiceError>;
}

/// Type label and confidence for an image region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub entity_type: EntityType,
    pub confidence: f32,
    pub description: String,
}

/// Vision/classification service used during upstream entity creation for
/// image-derived regions. Consumed here only as an interface.
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Classify the primary content type of an image region.
    async fn classify(&self, image: &[u8]) -> Result<Classification, ServiceError>;

    /// Transcribe an image region into the canonical format for `kind`
    /// (markdown text, YAML table, Mermaid diagram).
    async fn transcribe(&self, image: &[u8], kind: EntityType)
        -> Result<String, ServiceError>;
}

/// Downstream render step. Given the canonical merged document it produces a
/// human-facing view and returns its location.
pub trait RenderService: Send + Sync {
    fn regenerate(&self, document: &Path) -> Result<PathBuf, ServiceError>;
}

/// Render stub that reports the document itself as the rendered location.
/// Useful for sessions that only maintain ground truth.
#[derive(Debug, Default)]
pub struct NoopRender;

impl RenderService for NoopRender {
    fn regenerate(&self, document: &Path) -> Result<PathBuf, ServiceError> {
        Ok(document.to_path_buf())
    }
}
