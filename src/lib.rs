//! # docnorm
//!
//! Reliability layer for entity-segmented markdown documents that pass
//! through a free-text LLM rewrite step.
//!
//! A document produced by upstream extraction is a sequence of typed
//! entities (text, tables, diagrams) delimited by HTML-comment boundary
//! markers. Sending such a document through an external model for cleanup
//! is useful and dangerous in equal measure: the model fixes extraction
//! artefacts, but it also eats markers, reorders nothing you can prove, and
//! answers in whatever wrapper it feels like. This crate makes that step
//! safe:
//!
//! * **Chunk planning** — whole entities packed greedily under a byte
//!   budget, so every request fits the model context.
//! * **Marker protocol** — markers swapped for opaque placeholders around
//!   the call; survival is checked and boundaries restored afterwards, with
//!   explicit degraded modes instead of silent corruption.
//! * **Normalization run** — one sequential rewrite call per chunk with
//!   change-log capture; any failure aborts the whole run.
//! * **Entity store** — uniform content access over either ground truth
//!   (per-entity files or the merged document), chosen explicitly.
//! * **Correction ledger** — every edit appends an immutable audited entry
//!   with a before/after snapshot; batch and AI-assisted corrections
//!   included.
//!
//! ```text
//! document ──▶ chunks ──▶ placeholders ──▶ LLM ──▶ decode ──▶ reassembled
//!                                                     │
//!                               corrections ──▶ ledger + manifest + rebuild
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docnorm::{normalize, NormalizeConfig, OpenAiRewrite, RewriteService};
//!
//! # async fn run() -> Result<(), docnorm::DocNormError> {
//! let provider: Arc<dyn RewriteService> = Arc::new(OpenAiRewrite::from_env("gpt-4o", 0.2, None, 120)?);
//! let config = NormalizeConfig::builder().chunk_budget_bytes(60_000).build()?;
//!
//! let document = std::fs::read_to_string("document.md").unwrap();
//! let output = normalize(&document, &provider, &config).await?;
//! println!("{} chunks, {} merged", output.stats.total_chunks, output.stats.merged_entities);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Effect |
//! |---------|---------|--------|
//! | `cli`   | yes     | builds the `docnorm` binary (clap, anyhow, tracing-subscriber) |

pub mod config;
pub mod corrections;
pub mod entity;
pub mod error;
pub mod marker;
pub mod pipeline;
pub mod prompts;
pub mod services;
pub mod store;

pub use config::{NormalizeConfig, NormalizeConfigBuilder, DEFAULT_CHUNK_BUDGET_BYTES};
pub use corrections::{
    rebuild, BatchOutcome, Correction, CorrectionKind, CorrectionLedger, CorrectionProposal,
    CorrectionRequest, CorrectionSession,
};
pub use entity::{Entity, EntityId, EntityType, ExtractionMethod, Manifest, ManifestEntry};
pub use error::DocNormError;
pub use marker::{DecodeReport, MarkerFidelity, ParsedDocument};
pub use pipeline::chunk::{plan_chunks, DocumentChunk};
pub use pipeline::normalize::{
    normalize, normalize_file, ChunkReport, ChunkState, NormalizeOutput, NormalizeStats,
};
pub use services::{
    NoopRender, OpenAiRewrite, RenderService, RewriteResponse, RewriteService, ServiceError,
    VisionService,
};
pub use store::{ActiveSource, EntityStore, MERGED_DOCUMENT_FILE};
