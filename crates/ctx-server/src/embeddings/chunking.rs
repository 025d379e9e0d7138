// embeddings/chunking.rs
// Offset-based content chunking for embedding generation

use crate::error::{CtxError, Result};

/// Chunking parameters. Window boundaries prefer paragraph breaks, then line
/// breaks, then a hard cut.
#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chunk_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_chars: 100,
            min_chunk_chars: 100,
        }
    }
}

/// One contiguous slice of entity content.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Sequential, starting at 0.
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub content: String,
}

/// Result of chunking one entity's content.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub chunks: Vec<Chunk>,
    pub was_split: bool,
}

/// Round an offset down to the nearest char boundary so slices stay valid.
fn floor_char_boundary(s: &str, mut offset: usize) -> usize {
    if offset >= s.len() {
        return s.len();
    }
    while offset > 0 && !s.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}

/// Split content into overlapping windows.
///
/// - Content within `max_chars` yields a single chunk (`was_split = false`).
/// - Each window ends at the last paragraph boundary (`\n\n`) inside it,
///   falling back to the last line boundary, falling back to a hard cut.
/// - The next window starts `overlap_chars` before the previous end.
/// - A trailing chunk smaller than `min_chunk_chars` merges into its
///   predecessor.
/// - Every byte of the content lands in at least one chunk.
pub fn chunk_content(content: &str, opts: &ChunkOptions) -> Result<ChunkSet> {
    if opts.max_chars == 0 || opts.overlap_chars >= opts.max_chars {
        return Err(CtxError::InvalidInput(format!(
            "invalid chunk options: max_chars={} overlap_chars={}",
            opts.max_chars, opts.overlap_chars
        )));
    }

    let len = content.len();
    if len <= opts.max_chars {
        return Ok(ChunkSet {
            chunks: vec![Chunk {
                index: 0,
                start_offset: 0,
                end_offset: len,
                content: content.to_string(),
            }],
            was_split: false,
        });
    }

    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = floor_char_boundary(content, (start + opts.max_chars).min(len));
        let end = if hard_end >= len {
            len
        } else {
            pick_boundary(&content[start..hard_end]).map(|b| start + b).unwrap_or(hard_end)
        };
        spans.push((start, end));
        if end >= len {
            break;
        }
        let next = floor_char_boundary(content, end.saturating_sub(opts.overlap_chars));
        start = next.max(start + 1);
    }

    // Merge an undersized tail into its predecessor.
    if spans.len() > 1 {
        let (tail_start, tail_end) = spans[spans.len() - 1];
        if tail_end - tail_start < opts.min_chunk_chars {
            spans.pop();
            let last = spans.len() - 1;
            spans[last].1 = tail_end;
        }
    }

    let chunks = spans
        .into_iter()
        .enumerate()
        .map(|(index, (start_offset, end_offset))| Chunk {
            index,
            start_offset,
            end_offset,
            content: content[start_offset..end_offset].to_string(),
        })
        .collect();

    Ok(ChunkSet {
        chunks,
        was_split: true,
    })
}

/// Preferred cut inside a window: end of the last paragraph break, then end
/// of the last line break. None means hard cut.
fn pick_boundary(window: &str) -> Option<usize> {
    if let Some(pos) = window.rfind("\n\n") {
        let end = pos + 2;
        // A boundary at the very start makes no progress
        if end > 2 {
            return Some(end);
        }
    }
    if let Some(pos) = window.rfind('\n') {
        let end = pos + 1;
        if end > 1 {
            return Some(end);
        }
    }
    None
}

/// Expected chunk count for a content length under the default stride.
pub fn estimate_chunk_count(len: usize, opts: &ChunkOptions) -> usize {
    if len <= opts.max_chars {
        return 1;
    }
    let stride = opts.max_chars - opts.overlap_chars;
    std::cmp::max(1, (len - opts.overlap_chars).div_ceil(stride))
}
