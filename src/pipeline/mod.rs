//! Normalization pipeline stages.
//!
//! Each submodule implements exactly one transformation step, so every
//! stage is independently testable against a stub service.
//!
//! ## Data Flow
//!
//! ```text
//! document ──▶ chunk ──▶ encode ──▶ rewrite ──▶ postprocess ──▶ decode ──▶ reassemble
//! (markers)   (budget)  (placeholders) (LLM)    (fences, log)   (markers)
//! ```
//!
//! 1. [`chunk`] — greedy bin-packing of whole entities under the byte budget
//! 2. [`crate::marker`] — placeholder encoding/decoding around the external call
//! 3. [`normalize`] — drives one rewrite call per chunk, strictly in order;
//!    the only stage with network I/O
//! 4. [`postprocess`] — fence stripping and change-log splitting of raw
//!    responses

pub mod chunk;
pub mod normalize;
pub mod postprocess;
