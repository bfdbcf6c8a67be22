//! Overlapping, boundary-aware text chunker.
//!
//! Splits a file's text into [`Chunk`]s of at most `chunk_size` characters.
//! Every chunk after the first starts with the trailing `overlap`
//! characters of its predecessor, so dropping that prefix and
//! concatenating the chunks reproduces the original text exactly.
//!
//! # Algorithm
//!
//! 1. Work in character (not byte) positions so multi-byte UTF-8 is never cut.
//! 2. A window starts at `start` and may extend to `start + chunk_size`.
//! 3. If the window reaches the end of the text it becomes the final chunk.
//! 4. Otherwise pick the end of the window by preference: just after a blank
//!    line (`\n\n`), just after a newline, just after a space or tab, and
//!    finally a hard cut at `chunk_size`. Break points are only considered in
//!    the back half of the window and always past the overlap region, so
//!    each step makes progress.
//! 5. The next window starts `overlap` characters before the previous end.
//!
//! Chunk ids are derived from the file path and chunk index, so the same
//! input always yields identical output.
//!
//! # Example
//!
//! ```rust
//! use repo_health_core::chunk::split_text;
//!
//! let spans = split_text("abcdefghij", 4, 1).unwrap();
//! let pieces: Vec<&str> = spans.iter().map(|s| &"abcdefghij"[s.byte_start..s.byte_end]).collect();
//! assert_eq!(pieces, vec!["abcd", "defg", "ghij"]);
//! ```

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{Chunk, SourceFile};

/// Invalid chunker parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    #[error("chunk_size must be > 0")]
    ZeroChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk_size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

/// Location of one chunk inside the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub char_start: usize,
    pub char_end: usize,
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Compute chunk boundaries for `text`.
///
/// Returns an empty vector for empty text.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Span>, ChunkError> {
    validate(chunk_size, overlap)?;

    let chars: Vec<char> = text.chars().collect();
    let byte_offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let n = chars.len();
    let byte_at = |c: usize| if c >= n { text.len() } else { byte_offsets[c] };

    let mut spans = Vec::new();
    if n == 0 {
        return Ok(spans);
    }

    let mut start = 0usize;
    loop {
        let hard_end = (start + chunk_size).min(n);
        let end = if hard_end == n {
            n
        } else {
            find_break(&chars, start, hard_end, chunk_size, overlap)
        };

        spans.push(Span {
            char_start: start,
            char_end: end,
            byte_start: byte_at(start),
            byte_end: byte_at(end),
        });

        if end == n {
            break;
        }
        start = end - overlap;
    }

    Ok(spans)
}

/// Split a source file into chunks.
pub fn chunk_file(
    file: &SourceFile,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    let spans = split_text(&file.content, chunk_size, overlap)?;
    Ok(spans
        .iter()
        .enumerate()
        .map(|(index, span)| {
            make_chunk(
                file,
                index,
                span.byte_start,
                &file.content[span.byte_start..span.byte_end],
            )
        })
        .collect())
}

/// Rebuild a file's text from its chunks (in `chunk_index` order) by
/// dropping the overlapping prefix of every non-first chunk.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for chunk in chunks {
        if chunk.chunk_index == 0 {
            out.push_str(&chunk.text);
        } else {
            out.extend(chunk.text.chars().skip(overlap));
        }
    }
    out
}

fn validate(chunk_size: usize, overlap: usize) -> Result<(), ChunkError> {
    if chunk_size == 0 {
        return Err(ChunkError::ZeroChunkSize);
    }
    if overlap >= chunk_size {
        return Err(ChunkError::OverlapTooLarge {
            overlap,
            chunk_size,
        });
    }
    Ok(())
}

/// Pick the end (exclusive, in chars) of a window that cannot reach the end of the text.
fn find_break(
    chars: &[char],
    start: usize,
    hard_end: usize,
    chunk_size: usize,
    overlap: usize,
) -> usize {
    let floor = (start + overlap + 1).max(start + chunk_size / 2);

    let after = |pred: &dyn Fn(usize) -> bool| (floor..=hard_end).rev().find(|&p| pred(p));

    after(&|p| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n')
        .or_else(|| after(&|p| chars[p - 1] == '\n'))
        .or_else(|| after(&|p| chars[p - 1] == ' ' || chars[p - 1] == '\t'))
        .unwrap_or(hard_end)
}

fn make_chunk(file: &SourceFile, index: usize, byte_offset: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: chunk_id(&file.path, index),
        file_path: file.path.clone(),
        chunk_index: index,
        byte_offset,
        text: text.to_string(),
        language: file.language.clone(),
        hash,
    }
}

/// Stable chunk identity: first 32 hex chars of SHA-256(`path \0 index`).
pub fn chunk_id(file_path: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(index.to_le_bytes());
    format!("{:x}", hasher.finalize())[..32].to_string()
}
