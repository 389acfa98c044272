//! Chunk planning: group whole entities into size-bounded rewrite calls.
//!
//! Greedy bin-packing over the ordered entity blocks. Entities are atomic —
//! a block is never split across chunks — so a single block larger than the
//! budget becomes its own oversized chunk rather than being cut or dropped.
//! The plan is deterministic for a given input and budget.

use crate::entity::EntityId;
use crate::marker::{self, EntityBlock};

/// One size-bounded group of whole entities, already rendered in the
/// placeholder encoding. Transient — exists only for one normalization run.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    /// Ordered subset of the document's entity ids.
    pub entity_ids: Vec<EntityId>,
    /// Placeholder-marked text sent to the rewrite service.
    pub body: String,
    /// 1-based position in the plan.
    pub index: usize,
    /// Total number of chunks in the plan.
    pub total: usize,
}

/// Split ordered entity blocks into chunks whose estimated serialized size
/// stays within `budget_bytes`.
///
/// Flattening the returned chunks' id lists reproduces the input id sequence
/// exactly once each.
pub fn plan_chunks(blocks: &[EntityBlock], budget_bytes: usize) -> Vec<DocumentChunk> {
    if blocks.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<&EntityBlock>> = Vec::new();
    let mut current: Vec<&EntityBlock> = Vec::new();
    let mut current_size = 0usize;

    for block in blocks {
        let size = marker::encoded_len(block);
        if !current.is_empty() && current_size + size > budget_bytes {
            groups.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(block);
        current_size += size;
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let total = groups.len();
    groups
        .into_iter()
        .enumerate()
        .map(|(i, group)| {
            let owned: Vec<EntityBlock> = group.iter().map(|b| (*b).clone()).collect();
            DocumentChunk {
                entity_ids: group.iter().map(|b| b.id).collect(),
                body: marker::encode(&owned),
                index: i + 1,
                total,
            }
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────
