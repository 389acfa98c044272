//! System prompts and instruction builders for the rewrite service.
//!
//! Centralising every prompt here keeps a single source of truth and lets
//! unit tests inspect prompts without a live service. Callers can override
//! the judge prompt via [`crate::config::NormalizeConfig::system_prompt`].

use crate::entity::{EntityId, EntityType};

/// Default system instruction for the normalization judge.
///
/// Used when `NormalizeConfig::system_prompt` is `None`.
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are a meticulous document normalization judge. You receive a segment of a technical document whose entity boundaries are marked with [ENTITY:EXXX] tags.

Follow these rules precisely:

1. CONTENT FIDELITY
   - Correct obvious extraction artefacts: broken words, duplicated lines, garbled ordering
   - Never invent content and never delete information
   - Preserve YAML blocks, Mermaid blocks, and markdown structure exactly unless they are malformed

2. ENTITY TAGS
   - Every [ENTITY:EXXX] tag is structural; keep each one unless you are merging
   - When merging adjacent entities that are clearly one unit, keep only the FIRST entity's tag and delete the others
   - NEVER remove all tags

3. OUTPUT FORMAT
   - Return the corrected segment, then a `## Change Log` section listing each change as a bullet
   - If nothing needed fixing, return the segment unchanged with an empty change log
   - Do NOT wrap the response in code fences
   - Do NOT add commentary outside the change log"#;

/// Note prepended to multi-chunk requests so the service does not treat one
/// fragment as a complete document.
pub fn chunk_context_note(index: usize, total: usize) -> String {
    if total <= 1 {
        String::new()
    } else {
        format!(
            "\n\n**NOTE**: This is chunk {index} of {total} from a large document. \
             Process ONLY the entities below. Do not add document-level frontmatter \
             or headers to this chunk."
        )
    }
}

/// Per-chunk entity-tag rules, naming the exact ids the response must keep.
pub fn entity_tag_instruction(ids: &[EntityId]) -> String {
    let list: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!(
        "\n**CRITICAL**: The segment uses `[ENTITY:EXXX]` tags to mark entity boundaries.\n\
         There are {} entities in this chunk: {}.\n\n\
         Rules for entity tags:\n\
         - Every `[ENTITY:EXXX]` tag MUST appear in your output\n\
         - When MERGING entities, keep only the FIRST entity's tag and DELETE the others\n\
         - When NOT merging, keep each tag exactly where it is\n\
         - NEVER remove ALL tags\n\n\
         Return the corrected content followed by a `## Change Log` section.\n\
         If no changes are needed, return the content as-is with an empty change log.",
        ids.len(),
        list.join(", ")
    )
}

/// Assemble the full user message for one chunk.
pub fn chunk_user_message(index: usize, total: usize, ids: &[EntityId], body: &str) -> String {
    format!(
        "{}{}\n\n---\n\n{}",
        chunk_context_note(index, total),
        entity_tag_instruction(ids),
        body
    )
}

/// Type-keyed system prompt for single-entity AI correction.
pub fn correction_system_prompt(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Text | EntityType::Mixed => {
            "You are a document correction assistant. Fix errors in text content \
             while preserving markdown formatting."
        }
        EntityType::Table | EntityType::Form => {
            "You are a table correction assistant. Fix errors in YAML-formatted \
             data while preserving structure."
        }
        EntityType::Diagram => {
            "You are a diagram correction assistant. Fix errors in Mermaid \
             diagram syntax."
        }
        EntityType::ImageText => {
            "You are a document correction assistant. Fix errors in text \
             extracted from images."
        }
    }
}

/// User message for single-entity AI correction.
pub fn correction_user_message(content: &str, issue: &str) -> String {
    format!(
        "Original Content:\n```\n{content}\n```\n\nIssue Description:\n{issue}\n\n\
         Please provide the corrected content in the same format. \
         Only output the corrected content, no explanations."
    )
}

/// System prompt for a document-wide correction proposal. The response must
/// be strict JSON so it can be parsed without heuristics.
pub const BATCH_PROPOSAL_SYSTEM_PROMPT: &str = r#"You are a document correction assistant. Analyze the entire document and propose corrections based on the user's instruction.

For each entity that needs correction, output in this EXACT JSON format:
{
  "corrections": [
    {
      "entity_id": "E001",
      "corrected_content": "...",
      "reason": "Brief explanation of what was corrected"
    }
  ]
}

IMPORTANT:
- Only include entities that need changes
- Output ONLY valid JSON, no explanations outside the JSON
- Preserve the original format (markdown, YAML, Mermaid) of each entity
- The corrected_content must be the COMPLETE corrected content, not a diff"#;

/// User message for a document-wide proposal: the entity context followed by
/// the instruction.
pub fn batch_proposal_user_message(document_context: &str, instruction: &str) -> String {
    format!(
        "{document_context}\n\nUser Instruction:\n{instruction}\n\n\
         Analyze all entities above and propose corrections. \
         Output in the specified JSON format."
    )
}
