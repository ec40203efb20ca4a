//! Incremental sentence segmentation for streamed model output
//!
//! A sentence ends at `.`, `!` or `?` followed by a space. Punctuation at the
//! very end of the buffer is not a boundary yet because the next chunk may
//! continue the sentence (`3.` then `14`).

/// Sentence terminators, including the mandatory trailing space
pub const TERMINATORS: [&str; 3] = [". ", "! ", "? "];

/// Split `buffer` into complete sentences and the trailing remainder
///
/// Sentences are trimmed and empty ones dropped. The remainder is returned
/// untouched so it can be prefixed to the next chunk.
#[must_use]
pub fn segment(buffer: &str) -> (Vec<String>, String) {
    let mut sentences = Vec::new();
    let mut rest = buffer;

    while let Some(end) = next_boundary(rest) {
        let sentence = rest[..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        rest = &rest[end..];
    }

    (sentences, rest.to_string())
}

/// Turn a leftover remainder into a final sentence, if it has any content
#[must_use]
pub fn flush(remainder: &str) -> Option<String> {
    let sentence = remainder.trim();
    (!sentence.is_empty()).then(|| sentence.to_string())
}

/// Byte offset just past the earliest terminator
fn next_boundary(text: &str) -> Option<usize> {
    TERMINATORS
        .iter()
        .filter_map(|t| text.find(t).map(|idx| idx + t.len()))
        .min()
}

/// Stateful wrapper that accumulates chunks and yields finished sentences
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every sentence it completed
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let (sentences, remainder) = segment(&self.pending);
        self.pending = remainder;
        sentences
    }

    /// Text not yet terminated
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drain the remainder as a final sentence
    pub fn finish(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.pending);
        flush(&remainder)
    }
}
