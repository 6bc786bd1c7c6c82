//! Sentence-boundary chunking for synthesis input.

/// Characters that end a sentence. Includes the CJK full-width forms
/// because the assistant replies in Chinese.
const SENTENCE_TERMINATORS: [char; 7] = ['.', '!', '?', '。', '！', '？', '\n'];

/// Accumulates streamed completion deltas and emits whole sentences, so
/// the synthesizer receives speakable chunks instead of token fragments.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one delta; returns any sentences it completed.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        let mut sentences = Vec::new();
        for ch in delta.chars() {
            self.buffer.push(ch);
            if SENTENCE_TERMINATORS.contains(&ch) {
                let sentence = self.buffer.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                self.buffer.clear();
            }
        }
        sentences
    }

    /// Returns the unterminated tail, if any.
    pub fn flush(&mut self) -> Option<String> {
        let tail = self.buffer.trim().to_string();
        self.buffer.clear();
        if tail.is_empty() { None } else { Some(tail) }
    }
}
