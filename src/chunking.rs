//! Word-window transcript chunking.

use serde::{Deserialize, Serialize};

use crate::types::{Result, SiftError};

/// A contiguous word-windowed slice of a transcript.
///
/// `start_index` and `end_index` are word offsets into the source transcript,
/// with `end_index` exclusive. Chunks are created once at store time and never
/// mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptChunk {
    pub text: String,
    pub chunk_id: usize,
    pub start_index: usize,
    pub end_index: usize,
}

/// Splits `text` into overlapping windows of `window` words.
///
/// The overlap is clamped to `window / 2` so the window always advances.
/// Empty or whitespace-only input yields exactly one chunk with empty text
/// and a zero-length range; it carries no retrievable content but keeps
/// downstream bookkeeping uniform.
pub fn chunk_transcript(
    text: &str,
    window: usize,
    overlap: usize,
) -> Result<Vec<TranscriptChunk>> {
    if window == 0 {
        return Err(SiftError::Chunking(
            "window size must be at least one word".to_string(),
        ));
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(vec![TranscriptChunk {
            text: String::new(),
            chunk_id: 0,
            start_index: 0,
            end_index: 0,
        }]);
    }

    let overlap = overlap.min(window / 2);
    let stride = window - overlap;

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(words.len());
        chunks.push(TranscriptChunk {
            text: words[start..end].join(" "),
            chunk_id: chunks.len(),
            start_index: start,
            end_index: end,
        });
        if end == words.len() {
            break;
        }
        start += stride;
    }

    Ok(chunks)
}
