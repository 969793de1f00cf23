//! Chunking: batch tagged lines into backend-sized requests.

use crate::pipeline::lines::TaggedLine;
use serde::{Deserialize, Serialize};

/// An ordered batch of rows sent together to the extraction backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position among all chunks of the document, skipped ones included.
    pub index: usize,
    pub lines: Vec<String>,
}

impl Chunk {
    /// Lines joined with newlines, as sent to the backend.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

/// Result of chunking: what will be sent and what was too small to bother.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub chunks: Vec<Chunk>,
    /// Indices of chunks whose joined text fell below the minimum length.
    pub skipped: Vec<usize>,
}

impl ChunkPlan {
    /// Chunks produced before skipping.
    pub fn total(&self) -> usize {
        self.chunks.len() + self.skipped.len()
    }
}

/// Split `lines` into groups of `size`; groups whose joined text is shorter
/// than `min_chars` are recorded as skipped and never sent.
pub fn plan_chunks(lines: &[TaggedLine], size: usize, min_chars: usize) -> ChunkPlan {
    let mut plan = ChunkPlan::default();
    for (index, group) in lines.chunks(size.max(1)).enumerate() {
        let chunk = Chunk {
            index,
            lines: group.iter().map(TaggedLine::to_prompt_line).collect(),
        };
        if chunk.text().chars().count() < min_chars {
            plan.skipped.push(index);
        } else {
            plan.chunks.push(chunk);
        }
    }
    plan
}
