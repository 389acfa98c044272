//! Normalization orchestrator: one rewrite call per chunk, strictly in
//! document order, then reassembly.
//!
//! ## Why sequential?
//!
//! Chunks are never fanned out in parallel: (a) reassembly must be
//! deterministic in global document order, and (b) the merge instructions
//! only make sense when a chunk sees its full candidate entity set
//! contiguously. There is no cancellation mid-chunk and no retry — a failed
//! chunk aborts the whole run, because a partially-normalized document is
//! not a safe output.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::NormalizeConfig;
use crate::entity::EntityId;
use crate::error::DocNormError;
use crate::marker::{self, MarkerFidelity};
use crate::pipeline::chunk::{plan_chunks, DocumentChunk};
use crate::pipeline::postprocess;
use crate::prompts;
use crate::services::RewriteService;

/// Lifecycle of one chunk inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Sent,
    Completed,
    Failed,
}

/// Outcome record for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkReport {
    pub index: usize,
    pub total: usize,
    pub entity_ids: Vec<EntityId>,
    pub state: ChunkState,
    /// Marker survival tier; `None` until the chunk completes.
    pub fidelity: Option<MarkerFidelity>,
    /// Change log reported by the service for this chunk (may be empty).
    pub change_log: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub duration_ms: u64,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub total_entities: usize,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    /// Entities absorbed into a neighbour by a model-initiated merge.
    pub merged_entities: usize,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_duration_ms: u64,
}

/// Result of a normalization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeOutput {
    /// The reassembled document: original frontmatter, corrected entity
    /// regions with canonical markers, and (if any chunk reported changes)
    /// one consolidated change-log section grouped by chunk.
    pub document: String,
    pub chunks: Vec<ChunkReport>,
    pub stats: NormalizeStats,
}

/// Run the normalization judge over a merged document.
///
/// # Errors
/// [`DocNormError::ChunkFailed`] on the first transport/service error; the
/// run is aborted and no partial output is returned. Structural corruption
/// in responses is recovered by the marker protocol with a warning, never
/// raised.
pub async fn normalize(
    document: &str,
    provider: &Arc<dyn RewriteService>,
    config: &NormalizeConfig,
) -> Result<NormalizeOutput, DocNormError> {
    let run_start = Instant::now();
    let parsed = marker::parse_document(document);

    if parsed.blocks.is_empty() {
        // Nothing addressable; pass the document through unchanged.
        return Ok(NormalizeOutput {
            document: document.to_string(),
            chunks: Vec::new(),
            stats: NormalizeStats {
                total_duration_ms: run_start.elapsed().as_millis() as u64,
                ..Default::default()
            },
        });
    }

    let marker_map: HashMap<EntityId, String> = parsed
        .blocks
        .iter()
        .map(|b| (b.id, b.marker.clone()))
        .collect();

    let chunks = plan_chunks(&parsed.blocks, config.chunk_budget_bytes);
    info!(
        entities = parsed.blocks.len(),
        chunks = chunks.len(),
        budget = config.chunk_budget_bytes,
        "starting normalization run"
    );

    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(prompts::JUDGE_SYSTEM_PROMPT);

    let mut bodies: Vec<String> = Vec::with_capacity(chunks.len());
    let mut reports: Vec<ChunkReport> = Vec::with_capacity(chunks.len());
    let mut stats = NormalizeStats {
        total_entities: parsed.blocks.len(),
        total_chunks: chunks.len(),
        ..Default::default()
    };

    for chunk in &chunks {
        let report = process_chunk(chunk, provider, system_prompt, &marker_map).await;
        match report {
            Ok((body, report)) => {
                stats.completed_chunks += 1;
                stats.total_prompt_tokens += u64::from(report.prompt_tokens);
                stats.total_completion_tokens += u64::from(report.completion_tokens);
                if let Some(MarkerFidelity::Merged { absorbed }) = &report.fidelity {
                    stats.merged_entities += absorbed.len();
                }
                bodies.push(body);
                reports.push(report);
            }
            Err(source) => {
                // One failed chunk invalidates the run: downstream consumers
                // must never see a document that is half old, half new.
                return Err(DocNormError::ChunkFailed {
                    chunk: chunk.index,
                    total: chunk.total,
                    source,
                });
            }
        }
    }

    let document = reassemble(&parsed.frontmatter, &bodies, &reports, config);
    stats.total_duration_ms = run_start.elapsed().as_millis() as u64;
    info!(
        completed = stats.completed_chunks,
        merged = stats.merged_entities,
        ms = stats.total_duration_ms,
        "normalization run complete"
    );

    Ok(NormalizeOutput {
        document,
        chunks: reports,
        stats,
    })
}

/// Normalize a document file and write the result next to it.
///
/// Uses atomic write (temp file + rename) so a crash never leaves a partial
/// document behind.
pub async fn normalize_file(
    input: &Path,
    output: &Path,
    provider: &Arc<dyn RewriteService>,
    config: &NormalizeConfig,
) -> Result<NormalizeOutput, DocNormError> {
    let document = tokio::fs::read_to_string(input).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            DocNormError::DocumentNotFound {
                path: input.to_path_buf(),
            }
        } else {
            DocNormError::Io {
                path: input.to_path_buf(),
                source,
            }
        }
    })?;

    let result = normalize(&document, provider, config).await?;

    let tmp = output.with_extension("md.tmp");
    tokio::fs::write(&tmp, &result.document)
        .await
        .map_err(|source| DocNormError::Io {
            path: output.to_path_buf(),
            source,
        })?;
    tokio::fs::rename(&tmp, output)
        .await
        .map_err(|source| DocNormError::Io {
            path: output.to_path_buf(),
            source,
        })?;

    Ok(result)
}

/// Drive one chunk through `Sent → {Completed, Failed}`.
async fn process_chunk(
    chunk: &DocumentChunk,
    provider: &Arc<dyn RewriteService>,
    system_prompt: &str,
    marker_map: &HashMap<EntityId, String>,
) -> Result<(String, ChunkReport), crate::services::ServiceError> {
    let start = Instant::now();
    debug!(
        index = chunk.index,
        total = chunk.total,
        entities = chunk.entity_ids.len(),
        "sending chunk"
    );

    let user_message =
        prompts::chunk_user_message(chunk.index, chunk.total, &chunk.entity_ids, &chunk.body);

    let response = provider.rewrite(system_prompt, &user_message).await?;

    let unfenced = postprocess::strip_outer_fence(&response.content);
    let (body, change_log) = postprocess::split_change_log(&unfenced);
    let decoded = marker::decode(&body, &chunk.entity_ids, marker_map);

    let report = ChunkReport {
        index: chunk.index,
        total: chunk.total,
        entity_ids: chunk.entity_ids.clone(),
        state: ChunkState::Completed,
        fidelity: Some(decoded.fidelity),
        change_log,
        prompt_tokens: response.prompt_tokens,
        completion_tokens: response.completion_tokens,
        duration_ms: start.elapsed().as_millis() as u64,
    };

    Ok((decoded.restored, report))
}

/// Concatenate completed chunk bodies in order, re-attach the original
/// frontmatter untouched, and append one consolidated change-log section
/// grouped by chunk index when any chunk reported changes.
fn reassemble(
    frontmatter: &str,
    bodies: &[String],
    reports: &[ChunkReport],
    config: &NormalizeConfig,
) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(bodies.len() + 2);
    if !frontmatter.is_empty() {
        parts.push(frontmatter.to_string());
    }
    for body in bodies {
        parts.push(body.trim_end().to_string());
    }

    if config.include_change_log {
        let groups: Vec<String> = reports
            .iter()
            .filter(|r| !r.change_log.is_empty())
            .map(|r| format!("## Chunk {}\n{}", r.index, r.change_log))
            .collect();
        if !groups.is_empty() {
            parts.push(format!("\n---\n\n# Change Log\n\n{}", groups.join("\n\n")));
        }
    }

    let mut out = parts.join("\n");
    out.push('\n');
    out
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::format_marker;
    use crate::services::{RewriteResponse, ServiceError};
    use async_trait::async_trait;

    /// Echoes the chunk body back untouched, with an empty change log.
    struct EchoRewrite;

    #[async_trait]
    impl RewriteService for EchoRewrite {
        async fn rewrite(&self, _s: &str, user: &str) -> Result<RewriteResponse, ServiceError> {
            // Echo only the body below the instruction separator.
            let body = user.split("\n\n---\n\n").nth(1).unwrap_or(user);
            Ok(RewriteResponse {
                content: body.to_string(),
                prompt_tokens: 10,
                completion_tokens: 10,
            })
        }
    }

    /// Always fails with a transport error.
    struct FailingRewrite;

    #[async_trait]
    impl RewriteService for FailingRewrite {
        async fn rewrite(&self, _s: &str, _u: &str) -> Result<RewriteResponse, ServiceError> {
            Err(ServiceError::Transport {
                provider: "stub".into(),
                message: "connection reset".into(),
            })
        }
    }

    fn two_entity_doc() -> String {
        format!(
            "---\ndocument_title: T\n---\n\n{}\n\nAlpha text.\n\n{}\n\n```yaml\ntable:\n- k: v\n```\n",
            format_marker(EntityId(1), "TEXT", 1),
            format_marker(EntityId(2), "TABLE", 1),
        )
    }

    #[tokio::test]
    async fn echo_run_preserves_content_and_reports_no_changes() {
        let provider: Arc<dyn RewriteService> = Arc::new(EchoRewrite);
        let config = NormalizeConfig::default();
        let out = normalize(&two_entity_doc(), &provider, &config)
            .await
            .unwrap();

        assert_eq!(out.stats.total_entities, 2);
        assert_eq!(out.stats.completed_chunks, out.stats.total_chunks);
        assert!(out.chunks.iter().all(|c| c.change_log.is_empty()));
        assert!(out.document.contains("Alpha text."));
        assert!(out.document.contains("```yaml"));
        // Frontmatter re-attached untouched, markers restored, no change log.
        assert!(out.document.starts_with("---\ndocument_title: T\n---"));
        assert_eq!(out.document.matches("<!-- Entity:").count(), 2);
        assert!(!out.document.contains("# Change Log"));
    }

    #[tokio::test]
    async fn failed_chunk_aborts_run() {
        let provider: Arc<dyn RewriteService> = Arc::new(FailingRewrite);
        let config = NormalizeConfig::default();
        let err = normalize(&two_entity_doc(), &provider, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, DocNormError::ChunkFailed { chunk: 1, .. }));
    }

    #[tokio::test]
    async fn markerless_document_passes_through() {
        let provider: Arc<dyn RewriteService> = Arc::new(EchoRewrite);
        let config = NormalizeConfig::default();
        let out = normalize("plain prose, no entities\n", &provider, &config)
            .await
            .unwrap();
        assert_eq!(out.document, "plain prose, no entities\n");
        assert_eq!(out.stats.total_chunks, 0);
    }

    #[tokio::test]
    async fn change_logs_are_consolidated_by_chunk() {
        struct LoggingRewrite;

        #[async_trait]
        impl RewriteService for LoggingRewrite {
            async fn rewrite(
                &self,
                _s: &str,
                user: &str,
            ) -> Result<RewriteResponse, ServiceError> {
                let body = user.split("\n\n---\n\n").nth(1).unwrap_or(user);
                Ok(RewriteResponse {
                    content: format!("{body}\n\n## Change Log\n- tidied whitespace"),
                    ..Default::default()
                })
            }
        }

        let provider: Arc<dyn RewriteService> = Arc::new(LoggingRewrite);
        // Force two chunks with a small budget.
        let config = NormalizeConfig::builder()
            .chunk_budget_bytes(256)
            .build()
            .unwrap();
        let doc = format!(
            "{}\n\n{}\n\n{}\n\n{}\n",
            format_marker(EntityId(1), "TEXT", 1),
            "a".repeat(200),
            format_marker(EntityId(2), "TEXT", 2),
            "b".repeat(200),
        );
        let out = normalize(&doc, &provider, &config).await.unwrap();
        assert_eq!(out.stats.total_chunks, 2);
        assert!(out.document.contains("# Change Log"));
        assert!(out.document.contains("## Chunk 1"));
        assert!(out.document.contains("## Chunk 2"));
    }
}
