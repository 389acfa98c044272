//! Boundary markers and the placeholder protocol.
//!
//! ## Why placeholders?
//!
//! The canonical document delimits entities with HTML-comment markers:
//!
//! ```text
//! <!-- Entity: E012 | Type: TABLE | Page: 7 -->
//! ```
//!
//! The external rewrite step is free-text and routinely strips HTML comments
//! it considers noise. Before a chunk is sent out, every marker is replaced
//! with a short opaque placeholder (`[ENTITY:E012]`) the rewrite prompt
//! explicitly instructs the model to keep; after the response comes back,
//! [`decode`] checks which placeholders survived and restores the canonical
//! markers.
//!
//! ## Recovery tiers
//!
//! * all placeholders survive — full fidelity, markers restored.
//! * some survive — treated as explicit merges (the prompt instructs the
//!   model that merging entities means keeping only the first id's
//!   placeholder); absorbed ids are logged and the run proceeds.
//! * none survive — catastrophic loss. The first expected entity's canonical
//!   marker is re-prepended ahead of the untouched text. Boundary guarantees
//!   below the first entity are gone for this chunk; this is a documented
//!   best-effort degraded mode, deliberately without any re-segmentation
//!   heuristic, and it is always logged.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::entity::EntityId;

/// Canonical boundary marker line.
pub fn format_marker(id: EntityId, type_tag: &str, page: u32) -> String {
    format!("<!-- Entity: {id} | Type: {type_tag} | Page: {page} -->")
}

/// Transient placeholder substituted for a marker before a rewrite call.
pub fn placeholder(id: EntityId) -> String {
    format!("[ENTITY:{id}]")
}

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<!-- Entity: (E\d+) \| Type: ([^|]+?) \| Page: (\d+) -->").unwrap()
});

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[ENTITY:(E\d+)\]").unwrap());

/// Trailing change-log section separator appended by the normalization pass.
/// The merged-document parser treats it as the end of the last entity region.
static CHANGE_LOG_SEP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n---\s*\n# Change Log").unwrap());

/// One entity region of a parsed merged document.
#[derive(Debug, Clone)]
pub struct EntityBlock {
    pub id: EntityId,
    /// The full canonical marker line, verbatim, so restore is lossless even
    /// for legacy type spellings.
    pub marker: String,
    /// Body between this marker and the next (trimmed).
    pub content: String,
}

/// A merged document split into leading frontmatter and entity regions.
#[derive(Debug, Clone, Default)]
pub struct ParsedDocument {
    /// Everything before the first marker, trailing whitespace stripped.
    /// Re-attached untouched on reassembly.
    pub frontmatter: String,
    pub blocks: Vec<EntityBlock>,
}

/// Split a merged document on boundary markers.
///
/// The last entity's region ends at the next marker or at the trailing
/// change-log separator, whichever comes first. A document with no markers
/// parses as frontmatter only.
pub fn parse_document(content: &str) -> ParsedDocument {
    let markers: Vec<_> = MARKER_RE.find_iter(content).collect();
    let Some(first) = markers.first() else {
        return ParsedDocument {
            frontmatter: content.trim_end().to_string(),
            blocks: Vec::new(),
        };
    };

    let frontmatter = content[..first.start()].trim_end().to_string();
    let mut blocks = Vec::with_capacity(markers.len());

    for (i, m) in markers.iter().enumerate() {
        let caps = MARKER_RE.captures(m.as_str()).expect("re-match of a match");
        let id: EntityId = caps[1].parse().expect("marker id shape guaranteed by regex");

        let body_start = m.end();
        let mut body_end = markers
            .get(i + 1)
            .map(|n| n.start())
            .unwrap_or(content.len());
        // Only the last region can abut the trailing change log.
        if let Some(sep) = CHANGE_LOG_SEP_RE.find(&content[body_start..body_end]) {
            body_end = body_start + sep.start();
        }

        blocks.push(EntityBlock {
            id,
            marker: m.as_str().to_string(),
            content: content[body_start..body_end].trim().to_string(),
        });
    }

    ParsedDocument {
        frontmatter,
        blocks,
    }
}

/// Byte offset where the trailing change-log section starts, if present.
pub fn change_log_offset(content: &str) -> Option<usize> {
    CHANGE_LOG_SEP_RE.find(content).map(|m| m.start())
}

/// Render entity blocks as placeholder-marked text for one rewrite call.
pub fn encode(blocks: &[EntityBlock]) -> String {
    let parts: Vec<String> = blocks
        .iter()
        .map(|b| format!("\n{}\n\n{}\n", placeholder(b.id), b.content))
        .collect();
    parts.join("\n")
}

/// Serialized size of one block under the placeholder encoding, including
/// the joining newline. Used by the chunk planner so budget estimates match
/// what [`encode`] actually produces.
pub fn encoded_len(block: &EntityBlock) -> usize {
    // "\n" + placeholder + "\n\n" + content + "\n" (+ 1 join separator)
    placeholder(block.id).len() + block.content.len() + 5
}

/// Marker-survival outcome of one decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerFidelity {
    /// Every expected placeholder survived.
    Full,
    /// Some placeholders were dropped; interpreted as merges into the
    /// preceding surviving entity.
    Merged { absorbed: Vec<EntityId> },
    /// All placeholders were dropped; only the first entity's boundary was
    /// recovered. Sub-entity addressing is lost for this chunk.
    CatastrophicLoss,
}

/// Result of [`decode`]: restored canonical text plus the fidelity tier.
#[derive(Debug, Clone)]
pub struct DecodeReport {
    pub fidelity: MarkerFidelity,
    pub restored: String,
}

/// Validate placeholder survival in rewritten text and restore canonical
/// markers.
///
/// `expected` is the chunk's entity id list in document order; `markers`
/// maps each id to its verbatim canonical marker line. Placeholders for ids
/// outside the map are left untouched (and logged) rather than invented.
pub fn decode(
    text: &str,
    expected: &[EntityId],
    markers: &HashMap<EntityId, String>,
) -> DecodeReport {
    let found: HashSet<EntityId> = PLACEHOLDER_RE
        .captures_iter(text)
        .filter_map(|c| c[1].parse().ok())
        .collect();
    let expected_set: HashSet<EntityId> = expected.iter().copied().collect();
    let survived: HashSet<EntityId> = found.intersection(&expected_set).copied().collect();

    if survived.is_empty() && !expected.is_empty() {
        warn!(
            entities = expected.len(),
            first = %expected[0],
            "rewrite dropped every entity placeholder; re-prepending the first \
             boundary marker (sub-entity fidelity lost for this chunk)"
        );
        let first_marker = markers
            .get(&expected[0])
            .cloned()
            .unwrap_or_else(|| format!("<!-- Entity: {} -->", expected[0]));
        return DecodeReport {
            fidelity: MarkerFidelity::CatastrophicLoss,
            restored: format!("\n{first_marker}\n\n{}\n", text.trim()),
        };
    }

    let mut absorbed: Vec<EntityId> = expected_set.difference(&survived).copied().collect();
    absorbed.sort();

    if !absorbed.is_empty() {
        let list: Vec<String> = absorbed.iter().map(|id| id.to_string()).collect();
        warn!(
            survived = survived.len(),
            expected = expected.len(),
            absorbed = %list.join(", "),
            "rewrite dropped some entity placeholders; treating them as merged"
        );
    }

    let restored = PLACEHOLDER_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let id: EntityId = caps[1].parse().expect("placeholder id shape");
            match markers.get(&id) {
                Some(marker) => marker.clone(),
                None => {
                    warn!(id = %id, "placeholder for unknown entity left as-is");
                    caps[0].to_string()
                }
            }
        })
        .to_string();

    let fidelity = if absorbed.is_empty() {
        MarkerFidelity::Full
    } else {
        MarkerFidelity::Merged { absorbed }
    };

    DecodeReport { fidelity, restored }
}

// ── Tests ────────────────────────────────────────────────────────────────
