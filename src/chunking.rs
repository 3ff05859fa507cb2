use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};

/// Window settings for the chunker. Both values count Unicode scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub window: usize,
    /// Characters shared by consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            window: 500,
            overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn new(window: usize, overlap: usize) -> Result<Self> {
        let config = ChunkingConfig { window, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(RagError::Config("chunk window must be > 0".to_string()));
        }
        if self.overlap >= self.window {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be smaller than the window ({})",
                self.overlap, self.window
            )));
        }
        Ok(())
    }

    /// Distance between the starts of consecutive chunks.
    pub fn step(&self) -> usize {
        self.window - self.overlap
    }
}

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Unique identifier, namespaced by the parent document id
    pub id: String,
    /// Identifier of the document this chunk belongs to
    pub document_id: String,
    /// Position of this chunk within its document
    pub ordinal: usize,
    /// The actual text content of this chunk
    pub text: String,
    /// Character offset of the first character in the document
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
    /// Estimated token count for this chunk
    pub token_count: usize,
}

impl TextChunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    format!("{}/c{}", document_id, ordinal)
}

/// Split text into overlapping windows.
///
/// Chunk `i` starts at character `i * (window - overlap)`. Every chunk but the
/// last is exactly `window` characters long and the last one ends at the end
/// of the text. Text no longer than the window yields a single chunk; empty or
/// whitespace-only text yields none.
pub fn split_into_chunks(text: &str, document_id: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    // Byte offset of every character, plus the end of the text, so windows can
    // be sliced without splitting a code point.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let char_len = boundaries.len();
    boundaries.push(text.len());

    let step = config.step();
    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + config.window).min(char_len);
        let slice = &text[boundaries[start]..boundaries[end]];
        let ordinal = chunks.len();

        chunks.push(TextChunk {
            id: chunk_id(document_id, ordinal),
            document_id: document_id.to_string(),
            ordinal,
            text: slice.to_string(),
            start,
            end,
            token_count: estimate_token_count(slice),
        });

        if end == char_len {
            break;
        }
        start += step;
    }

    chunks
}

/// Rough token count: whitespace-separated words plus ASCII punctuation.
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
