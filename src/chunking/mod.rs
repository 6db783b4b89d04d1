//! Transcript chunking: fixed-size, overlapping character windows.
//!
//! Sizes are measured in characters so multi-byte text never splits inside a
//! code point; offsets are byte offsets into the original text so a draft can
//! always be traced back with `&text[offset_start..offset_end]`.

pub mod sections;

use crate::error::{RagError, Result};

/// Output of the chunking process, before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    /// Byte offset of the first character in the original text.
    pub offset_start: usize,
    /// Byte offset one past the last character.
    pub offset_end: usize,
    /// Byte offset where the content not shared with the previous chunk begins.
    pub fresh_start: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

impl ChunkDraft {
    /// The part of this chunk that does not overlap its predecessor.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.fresh_start - self.offset_start..]
    }
}

/// Number of chunks `split` produces for a text of `len` characters.
pub fn chunk_count(len: usize, size: usize, overlap: usize) -> usize {
    if len <= overlap {
        return 1;
    }
    let step = size - overlap;
    (len - overlap).div_ceil(step)
}

/// Split `text` into overlapping windows of `size` characters.
///
/// Deterministic: the same input always yields identical boundaries. The last
/// chunk may be shorter than `size`. Concatenating every draft's
/// [`fresh_text`](ChunkDraft::fresh_text) reproduces `text` exactly.
pub fn split(text: &str, size: usize, overlap: usize) -> Result<Vec<ChunkDraft>> {
    if size == 0 || overlap >= size {
        return Err(RagError::Validation(format!(
            "invalid chunking parameters: size={size}, overlap={overlap}"
        )));
    }

    // Byte offset of every char boundary, including the end of the text
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    boundaries.push(text.len());
    let len = boundaries.len() - 1;

    let total = chunk_count(len, size, overlap);
    let step = size - overlap;
    let mut drafts = Vec::with_capacity(total);
    let mut prev_end = 0usize;

    for index in 0..total {
        let start = index * step;
        let end = (start + size).min(len);
        let offset_start = boundaries[start];
        let offset_end = boundaries[end];
        drafts.push(ChunkDraft {
            text: text[offset_start..offset_end].to_string(),
            offset_start,
            offset_end,
            fresh_start: prev_end.max(offset_start),
            chunk_index: index,
            total_chunks: total,
        });
        prev_end = offset_end;
    }

    Ok(drafts)
}
