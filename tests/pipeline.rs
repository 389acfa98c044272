//! End-to-end pipeline tests against deterministic stub services.
//!
//! No network: every test drives the library through a scripted
//! `RewriteService` and a temp document directory.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use docnorm::{
    normalize, plan_chunks, rebuild, ActiveSource, CorrectionKind, CorrectionProposal,
    CorrectionRequest, CorrectionSession, EntityId, EntityType, Manifest, ManifestEntry,
    MarkerFidelity, NoopRender, NormalizeConfig, RewriteResponse, RewriteService, ServiceError,
};

// ── Stub services ────────────────────────────────────────────────────────

/// Returns the chunk body untouched with an empty change log.
struct EchoRewrite;

#[async_trait]
impl RewriteService for EchoRewrite {
    async fn rewrite(&self, _system: &str, user: &str) -> Result<RewriteResponse, ServiceError> {
        Ok(RewriteResponse {
            content: chunk_body(user).to_string(),
            prompt_tokens: 100,
            completion_tokens: 100,
        })
    }
}

/// Deletes one named placeholder from the body, simulating a model merge.
struct DropOneRewrite(EntityId);

#[async_trait]
impl RewriteService for DropOneRewrite {
    async fn rewrite(&self, _system: &str, user: &str) -> Result<RewriteResponse, ServiceError> {
        let body = chunk_body(user).replace(&format!("[ENTITY:{}]", self.0), "");
        Ok(RewriteResponse {
            content: body,
            ..Default::default()
        })
    }
}

/// Deletes every placeholder, simulating the worst structural corruption.
struct DropAllRewrite;

#[async_trait]
impl RewriteService for DropAllRewrite {
    async fn rewrite(&self, _system: &str, user: &str) -> Result<RewriteResponse, ServiceError> {
        let re = regex::Regex::new(r"\[ENTITY:E\d+\]").unwrap();
        Ok(RewriteResponse {
            content: re.replace_all(chunk_body(user), "").to_string(),
            ..Default::default()
        })
    }
}

/// Extract the content below the instruction preamble of a chunk request.
fn chunk_body(user: &str) -> &str {
    user.split("\n\n---\n\n").nth(1).unwrap_or(user)
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn marker(id: u32, tag: &str, page: u32) -> String {
    format!("<!-- Entity: E{id:03} | Type: {tag} | Page: {page} -->")
}

fn three_entity_doc() -> String {
    format!(
        "---\ndocument_title: Mixed Report\n---\n\n\
         {}\n\nIntro paragraph with some prose.\n\n\
         {}\n\n```yaml\ntable:\n- name: a\n  value: 1\n```\n\n\
         {}\n\n```mermaid\ngraph TD\nA-->B\n```\n",
        marker(1, "TEXT", 1),
        marker(2, "TABLE", 2),
        marker(3, "DIAGRAM", 3),
    )
}

fn entry(id: u32, t: EntityType, page: u32, file: &str) -> ManifestEntry {
    ManifestEntry {
        id: EntityId(id),
        entity_type: t,
        page,
        position: id,
        confidence: Some(0.9),
        file: file.to_string(),
        corrected: false,
        correction_timestamp: None,
        correction_kind: None,
    }
}

/// Seed a document directory with three typed entity files and a manifest.
fn seed_document_dir(dir: &Path) -> Manifest {
    let manifest = Manifest {
        document_title: Some("Mixed Report".into()),
        source_file: Some("report.pdf".into()),
        entities: vec![
            entry(1, EntityType::Text, 1, "entity_E001.md"),
            entry(2, EntityType::Table, 2, "entity_E002.yaml"),
            entry(3, EntityType::Diagram, 3, "entity_E003.mmd"),
        ],
    };
    manifest.save(dir).unwrap();
    std::fs::write(
        dir.join("entity_E001.md"),
        "---\nentity_id: E001\ntype: TEXT\n---\n\nIntro paragraph.\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("entity_E002.yaml"),
        "# entity_id: E002\n# type: TABLE\n\ntable:\n- name: a\n  value: 1\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("entity_E003.mmd"),
        "%% entity_id: E003\n%% type: DIAGRAM\n\ngraph TD\nA-->B\n",
    )
    .unwrap();
    manifest
}

// ── Chunk planning through the real parser ───────────────────────────────

#[test]
fn chunk_plan_flattens_back_to_document_order() {
    let parsed = docnorm::marker::parse_document(&three_entity_doc());
    let chunks = plan_chunks(&parsed.blocks, 64);
    assert!(chunks.len() > 1, "tiny budget must force several chunks");

    let flat: Vec<EntityId> = chunks.iter().flat_map(|c| c.entity_ids.clone()).collect();
    assert_eq!(flat, vec![EntityId(1), EntityId(2), EntityId(3)]);
}

// ── Normalization with stubs ─────────────────────────────────────────────

#[tokio::test]
async fn echo_service_leaves_document_equivalent() {
    let provider: Arc<dyn RewriteService> = Arc::new(EchoRewrite);
    let config = NormalizeConfig::default();
    let doc = three_entity_doc();

    let out = normalize(&doc, &provider, &config).await.unwrap();

    let before = docnorm::marker::parse_document(&doc);
    let after = docnorm::marker::parse_document(&out.document);
    assert_eq!(before.blocks.len(), after.blocks.len());
    for (b, a) in before.blocks.iter().zip(&after.blocks) {
        assert_eq!(b.id, a.id);
        assert_eq!(b.content, a.content);
    }
    assert!(out
        .chunks
        .iter()
        .all(|c| c.fidelity == Some(MarkerFidelity::Full)));
    assert!(!out.document.contains("# Change Log"));
}

#[tokio::test]
async fn dropped_placeholder_is_reported_as_merge() {
    let provider: Arc<dyn RewriteService> = Arc::new(DropOneRewrite(EntityId(2)));
    let config = NormalizeConfig::default();

    let out = normalize(&three_entity_doc(), &provider, &config)
        .await
        .unwrap();

    assert_eq!(out.stats.merged_entities, 1);
    let fidelities: Vec<_> = out.chunks.iter().filter_map(|c| c.fidelity.clone()).collect();
    assert!(fidelities.contains(&MarkerFidelity::Merged {
        absorbed: vec![EntityId(2)]
    }));
    // E002's region merged into E001: its marker is gone, the others remain.
    assert!(!out.document.contains("E002 |"));
    assert!(out.document.contains("E001 |"));
    assert!(out.document.contains("E003 |"));
}

#[tokio::test]
async fn total_marker_loss_still_yields_a_boundary() {
    let provider: Arc<dyn RewriteService> = Arc::new(DropAllRewrite);
    let config = NormalizeConfig::default();

    let out = normalize(&three_entity_doc(), &provider, &config)
        .await
        .unwrap();

    assert!(out
        .chunks
        .iter()
        .any(|c| c.fidelity == Some(MarkerFidelity::CatastrophicLoss)));
    // Never zero markers in the output document.
    assert!(out.document.matches("<!-- Entity:").count() >= 1);
    // Content survives the degradation.
    assert!(out.document.contains("Intro paragraph with some prose."));
}

// ── Corrections over a real directory ────────────────────────────────────

#[test]
fn correction_is_read_your_write_with_audit_trail() {
    let dir = tempfile::tempdir().unwrap();
    seed_document_dir(dir.path());

    let mut session =
        CorrectionSession::open(dir.path(), ActiveSource::EntityFiles, Box::new(NoopRender))
            .unwrap();

    let before = session.content(EntityId(2)).unwrap();
    let correction = session
        .apply(CorrectionRequest {
            entity_id: EntityId(2),
            kind: CorrectionKind::Manual,
            corrected_content: "table:\n- name: a\n  value: 2".into(),
            reason: "value was off by one".into(),
            prompt: None,
        })
        .unwrap();

    assert_eq!(correction.original_content, before);
    assert_eq!(
        session.content(EntityId(2)).unwrap(),
        "table:\n- name: a\n  value: 2"
    );

    // Ledger and manifest both persisted.
    let manifest = Manifest::load(dir.path()).unwrap();
    assert!(manifest.entry(EntityId(2)).unwrap().corrected);
    assert!(dir.path().join("corrections.json").exists());
}

#[test]
fn rebuild_round_trips_manifest_order_and_types() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = seed_document_dir(dir.path());

    let path = rebuild(&manifest, dir.path()).unwrap();
    let doc = std::fs::read_to_string(&path).unwrap();
    let parsed = docnorm::marker::parse_document(&doc);

    let got: Vec<(EntityId, String)> = parsed
        .blocks
        .iter()
        .map(|b| (b.id, b.marker.clone()))
        .collect();
    let want: Vec<(EntityId, String)> = manifest
        .entities
        .iter()
        .map(|e| {
            (
                e.id,
                format!(
                    "<!-- Entity: {} | Type: {} | Page: {} -->",
                    e.id,
                    e.entity_type.marker_tag(),
                    e.page
                ),
            )
        })
        .collect();
    assert_eq!(got, want);

    // Fencing follows each type's convention.
    assert!(!parsed.blocks[0].content.starts_with("```"));
    assert!(parsed.blocks[1].content.starts_with("```yaml"));
    assert!(parsed.blocks[2].content.starts_with("```mermaid"));
}

#[test]
fn batch_with_unknown_entity_applies_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    seed_document_dir(dir.path());

    let mut session =
        CorrectionSession::open(dir.path(), ActiveSource::EntityFiles, Box::new(NoopRender))
            .unwrap();

    let proposals = vec![
        CorrectionProposal {
            entity_id: EntityId(1),
            corrected_content: "Corrected intro.".into(),
            reason: "typo".into(),
        },
        CorrectionProposal {
            entity_id: EntityId(42),
            corrected_content: "phantom".into(),
            reason: "n/a".into(),
        },
        CorrectionProposal {
            entity_id: EntityId(3),
            corrected_content: "graph TD\nA-->C".into(),
            reason: "wrong edge".into(),
        },
    ];

    let outcome = session.apply_batch(proposals, Some("cleanup pass")).unwrap();

    assert_eq!(outcome.applied.len(), 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].entity_id, EntityId(42));
    // The regenerated document exists despite the partial failure.
    assert!(outcome.location.exists());

    assert_eq!(session.content(EntityId(1)).unwrap(), "Corrected intro.");
    assert_eq!(session.content(EntityId(3)).unwrap(), "graph TD\nA-->C");
}

#[test]
fn merged_document_mode_reads_what_rebuild_wrote() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = seed_document_dir(dir.path());
    rebuild(&manifest, dir.path()).unwrap();

    let mut session = CorrectionSession::open(
        dir.path(),
        ActiveSource::MergedDocument,
        Box::new(NoopRender),
    )
    .unwrap();

    assert_eq!(session.content(EntityId(1)).unwrap(), "Intro paragraph.");

    // A splice write survives a fresh read from disk.
    session
        .apply(CorrectionRequest {
            entity_id: EntityId(1),
            kind: CorrectionKind::Manual,
            corrected_content: "Spliced intro.".into(),
            reason: "rewrite".into(),
            prompt: None,
        })
        .unwrap();
    session.store().invalidate();
    assert_eq!(session.content(EntityId(1)).unwrap(), "Spliced intro.");

    // Neighbouring regions are untouched by the splice.
    assert!(session
        .content(EntityId(2))
        .unwrap()
        .contains("value: 1"));
}
