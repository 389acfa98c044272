//! Audited corrections over the active ground truth.
//!
//! Every content change flows through [`CorrectionSession::apply`]: read the
//! current value, append an immutable ledger entry carrying the
//! before/after snapshot, write the new value through the active source,
//! and flag the manifest entry. The ledger (`corrections.json`) is
//! append-only; the latest entry per entity is authoritative and nothing is
//! ever rewritten or deleted, so the full history stays auditable.
//!
//! Batch corrections are deliberately *not* atomic: each proposal applies
//! independently, per-entity failures become data in the [`BatchOutcome`]
//! report, and the remaining entities still proceed.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::entity::{EntityId, Manifest};
use crate::error::DocNormError;
use crate::marker;
use crate::prompts;
use crate::services::{RenderService, RewriteService};
use crate::store::{
    write_atomic, ActiveSource, EntityContentSource, EntityFileSource, EntityStore,
    MERGED_DOCUMENT_FILE,
};

/// Ledger file name inside a document directory.
pub const LEDGER_FILE: &str = "corrections.json";

// ── Ledger records ───────────────────────────────────────────────────────

/// Who authored a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    Manual,
    Ai,
}

impl FromStr for CorrectionKind {
    type Err = DocNormError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(CorrectionKind::Manual),
            "ai" => Ok(CorrectionKind::Ai),
            other => Err(DocNormError::Validation(format!(
                "unknown correction kind '{other}' (expected 'manual' or 'ai')"
            ))),
        }
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub entity_id: EntityId,
    pub kind: CorrectionKind,
    /// Content as read immediately before this correction was applied.
    pub original_content: String,
    pub corrected_content: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    /// The instruction or issue description behind an AI correction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Append-only correction history, persisted as `corrections.json`.
#[derive(Debug)]
pub struct CorrectionLedger {
    path: PathBuf,
    entries: Vec<Correction>,
}

impl CorrectionLedger {
    /// Load the ledger from a document directory. A missing file is an
    /// empty ledger, not an error.
    pub fn load(dir: &Path) -> Result<Self, DocNormError> {
        let path = dir.join(LEDGER_FILE);
        let entries = match std::fs::read_to_string(&path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                DocNormError::Validation(format!("malformed ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(DocNormError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(Self { path, entries })
    }

    /// Append one entry and persist the whole ledger atomically.
    pub fn append(&mut self, correction: Correction) -> Result<(), DocNormError> {
        self.entries.push(correction);
        let json = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| DocNormError::Internal(format!("ledger serialisation: {e}")))?;
        write_atomic(&self.path, &json)
    }

    /// Latest correction for `id`, if any.
    pub fn current(&self, id: EntityId) -> Option<&Correction> {
        self.entries.iter().rev().find(|c| c.entity_id == id)
    }

    /// Full history for `id`, oldest first.
    pub fn history(&self, id: EntityId) -> Vec<&Correction> {
        self.entries.iter().filter(|c| c.entity_id == id).collect()
    }

    pub fn entries(&self) -> &[Correction] {
        &self.entries
    }
}

// ── Requests & batch reporting ───────────────────────────────────────────

/// A validated manual or pre-computed correction to apply.
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    pub entity_id: EntityId,
    pub kind: CorrectionKind,
    pub corrected_content: String,
    pub reason: String,
    pub prompt: Option<String>,
}

impl CorrectionRequest {
    fn validate(&self) -> Result<(), DocNormError> {
        if self.corrected_content.trim().is_empty() {
            return Err(DocNormError::Validation(
                "corrected content must not be empty".into(),
            ));
        }
        if self.reason.trim().is_empty() {
            return Err(DocNormError::Validation("reason must not be empty".into()));
        }
        Ok(())
    }
}

/// One proposed correction, as produced by a document-wide proposal call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionProposal {
    pub entity_id: EntityId,
    pub corrected_content: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct ProposalResponse {
    corrections: Vec<CorrectionProposal>,
}

/// Per-entity failure inside a batch run. Data, not an error: the batch
/// continues past it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub entity_id: EntityId,
    pub error: String,
}

/// Report of one batch correction run.
#[derive(Debug)]
pub struct BatchOutcome {
    pub applied: Vec<Correction>,
    pub failures: Vec<BatchFailure>,
    /// Location of the regenerated document view.
    pub location: PathBuf,
}

// ── Session ──────────────────────────────────────────────────────────────

/// Single-writer correction session over one document directory.
///
/// Owns the store, the ledger, and the render collaborator. Callers
/// serialize access; there is no internal locking.
pub struct CorrectionSession {
    store: EntityStore,
    ledger: CorrectionLedger,
    render: Box<dyn RenderService>,
    active: ActiveSource,
}

impl CorrectionSession {
    /// Open a session on a document directory.
    pub fn open(
        root: impl Into<PathBuf>,
        active: ActiveSource,
        render: Box<dyn RenderService>,
    ) -> Result<Self, DocNormError> {
        let root = root.into();
        let store = EntityStore::open(&root, active)?;
        let ledger = CorrectionLedger::load(&root)?;
        Ok(Self {
            store,
            ledger,
            render,
            active,
        })
    }

    /// Current content of one entity from the active source.
    pub fn content(&mut self, id: EntityId) -> Result<String, DocNormError> {
        self.store.get(id)
    }

    pub fn store(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn ledger(&self) -> &CorrectionLedger {
        &self.ledger
    }

    /// Apply one correction: snapshot, append to the ledger, write through
    /// the active source, flag the manifest.
    pub fn apply(&mut self, request: CorrectionRequest) -> Result<Correction, DocNormError> {
        request.validate()?;
        let original_content = self.store.get(request.entity_id)?;

        let correction = Correction {
            entity_id: request.entity_id,
            kind: request.kind,
            original_content,
            corrected_content: request.corrected_content.clone(),
            reason: request.reason,
            timestamp: Utc::now(),
            prompt: request.prompt,
        };

        // Ledger first: a write that then fails leaves an audit trail of
        // the attempt rather than a silent content change.
        self.ledger.append(correction.clone())?;
        self.store.set(request.entity_id, &request.corrected_content)?;

        if let Some(entry) = self.store.manifest.entry_mut(request.entity_id) {
            entry.corrected = true;
            entry.correction_timestamp = Some(correction.timestamp);
            entry.correction_kind = Some(correction.kind);
        }
        let root = self.store.root().to_path_buf();
        self.store.manifest.save(&root)?;

        info!(
            entity = %correction.entity_id,
            kind = ?correction.kind,
            "correction applied"
        );
        Ok(correction)
    }

    /// Apply a set of proposals independently. Never atomic: each entity
    /// succeeds or fails on its own and the document is regenerated at the
    /// end regardless of partial failure.
    pub fn apply_batch(
        &mut self,
        proposals: Vec<CorrectionProposal>,
        shared_prompt: Option<&str>,
    ) -> Result<BatchOutcome, DocNormError> {
        let mut applied = Vec::new();
        let mut failures = Vec::new();

        for proposal in proposals {
            let request = CorrectionRequest {
                entity_id: proposal.entity_id,
                kind: CorrectionKind::Ai,
                corrected_content: proposal.corrected_content,
                reason: proposal.reason,
                prompt: shared_prompt.map(str::to_string),
            };
            match self.apply(request) {
                Ok(c) => applied.push(c),
                Err(e) => {
                    warn!(entity = %proposal.entity_id, error = %e, "batch item failed");
                    failures.push(BatchFailure {
                        entity_id: proposal.entity_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        let location = self.regenerate()?;
        info!(
            applied = applied.len(),
            failed = failures.len(),
            "batch correction finished"
        );
        Ok(BatchOutcome {
            applied,
            failures,
            location,
        })
    }

    /// Bring the human-facing view up to date with the ground truth.
    ///
    /// In entity-file mode the merged document is rebuilt first; in splice
    /// mode it is already current. Either way the store cache is dropped and
    /// the render collaborator is invoked.
    pub fn regenerate(&mut self) -> Result<PathBuf, DocNormError> {
        if self.active == ActiveSource::EntityFiles {
            rebuild(&self.store.manifest, self.store.root())?;
        }
        self.store.invalidate();
        let document = self.store.document_path();
        let location = self.render.regenerate(&document)?;
        Ok(location)
    }

    /// One external call proposing corrections across the whole document.
    ///
    /// The entity context sent out is capped at `budget_bytes`; entities
    /// past the cap are skipped with a warning rather than truncated
    /// mid-content. Proposals naming ids absent from the manifest are
    /// dropped with a warning.
    pub async fn propose_corrections(
        &mut self,
        rewrite: &Arc<dyn RewriteService>,
        instruction: &str,
        budget_bytes: usize,
    ) -> Result<Vec<CorrectionProposal>, DocNormError> {
        let entries = self.store.manifest.entities.clone();

        let mut context = String::new();
        for entry in &entries {
            let content = self.store.get(entry.id)?;
            let block = format!(
                "[{}] (type: {}, page: {})\n{}\n\n",
                entry.id, entry.entity_type, entry.page, content
            );
            if context.len() + block.len() > budget_bytes {
                warn!(
                    from = %entry.id,
                    budget = budget_bytes,
                    "document context exceeds budget; remaining entities skipped"
                );
                break;
            }
            context.push_str(&block);
        }

        let user = prompts::batch_proposal_user_message(context.trim_end(), instruction);
        let response = rewrite
            .rewrite(prompts::BATCH_PROPOSAL_SYSTEM_PROMPT, &user)
            .await
            .map_err(DocNormError::ExternalService)?;

        let json = strip_json_fence(&response.content);
        let parsed: ProposalResponse = serde_json::from_str(json).map_err(|e| {
            DocNormError::Validation(format!("proposal response is not valid JSON: {e}"))
        })?;

        let mut proposals = Vec::with_capacity(parsed.corrections.len());
        for p in parsed.corrections {
            if self.store.manifest.entry(p.entity_id).is_none() {
                warn!(entity = %p.entity_id, "proposal names an unknown entity; dropped");
                continue;
            }
            proposals.push(p);
        }
        Ok(proposals)
    }

    /// Correct one entity with the rewrite service and apply the result.
    ///
    /// The system prompt is keyed on the entity's type so tables stay YAML
    /// and diagrams stay Mermaid. The issue description is recorded as the
    /// ledger entry's prompt.
    pub async fn ai_correct_entity(
        &mut self,
        rewrite: &Arc<dyn RewriteService>,
        id: EntityId,
        issue: &str,
    ) -> Result<Correction, DocNormError> {
        let entity_type = self.store.entity_type(id)?;
        let content = self.store.get(id)?;

        let response = rewrite
            .rewrite(
                prompts::correction_system_prompt(entity_type),
                &prompts::correction_user_message(&content, issue),
            )
            .await
            .map_err(DocNormError::ExternalService)?;

        let corrected = crate::pipeline::postprocess::strip_outer_fence(&response.content);
        self.apply(CorrectionRequest {
            entity_id: id,
            kind: CorrectionKind::Ai,
            corrected_content: corrected,
            reason: format!("AI correction: {issue}"),
            prompt: Some(issue.to_string()),
        })
    }
}

/// Strip one enclosing ``` / ```json fence from a JSON reply.
fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_start_matches('\n')
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

// ── Document assembly ────────────────────────────────────────────────────

/// Rebuild the merged document from the per-entity files.
///
/// Entities are emitted in manifest order: canonical marker, blank line,
/// body re-wrapped per the type's fencing convention. The result is written
/// atomically as `document.md` in the document directory.
pub fn rebuild(manifest: &Manifest, root: &Path) -> Result<PathBuf, DocNormError> {
    let mut source = EntityFileSource::new(root.to_path_buf());
    let mut out = String::new();

    if let Some(title) = &manifest.document_title {
        out.push_str(&format!("# {title}\n\n"));
    }

    for entry in &manifest.entities {
        let body = source.read(entry)?;
        let wrapped = match entry.entity_type.fence_language() {
            Some(lang) if !body.trim_start().starts_with("```") => {
                format!("```{lang}\n{}\n```", body.trim_end())
            }
            _ => body.trim_end().to_string(),
        };
        out.push_str(&marker::format_marker(
            entry.id,
            entry.entity_type.marker_tag(),
            entry.page,
        ));
        out.push_str("\n\n");
        out.push_str(&wrapped);
        out.push_str("\n\n");
    }

    let path = root.join(MERGED_DOCUMENT_FILE);
    let mut doc = out.trim_end().to_string();
    doc.push('\n');
    write_atomic(&path, &doc)?;
    Ok(path)
}

// ── Tests ────────────────────────────────────────────────────────────────
