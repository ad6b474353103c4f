//! Token-bounded chunking with overlap
//!
//! Tokens are Unicode word segments, which stays deterministic and tracks
//! embedding-model vocabularies closely enough for size decisions. Splits
//! prefer the nearest sentence boundary within a window of the target and
//! fall back to a hard cut.

use unicode_segmentation::UnicodeSegmentation;

use parley_config::IngestConfig;

/// One chunk produced by the splitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub index: usize,
    pub content: String,
    pub token_count: usize,
}

/// Count tokens the same way the chunker does
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

/// Overlapping token-bounded splitter
#[derive(Debug, Clone)]
pub struct TokenChunker {
    chunk_tokens: usize,
    overlap_tokens: usize,
    boundary_window: usize,
}

impl TokenChunker {
    pub fn new(chunk_tokens: usize, overlap_tokens: usize, boundary_window: usize) -> Self {
        assert!(
            overlap_tokens < chunk_tokens,
            "overlap must be smaller than chunk size"
        );
        Self {
            chunk_tokens,
            overlap_tokens,
            boundary_window,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.chunk_tokens,
            config.overlap_tokens,
            config.boundary_window_tokens,
        )
    }

    /// Split text into overlapping chunks; empty input yields no chunks
    pub fn split(&self, text: &str) -> Vec<ChunkDraft> {
        // Token i occupies bytes word_starts[i] .. word_ends[i].
        let words: Vec<(usize, &str)> = text.unicode_word_indices().collect();
        let n = words.len();
        if n == 0 {
            return Vec::new();
        }

        let boundary_tokens = self.sentence_start_tokens(text, &words);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        loop {
            let target = start + self.chunk_tokens;
            let end = if target >= n {
                n
            } else {
                self.pick_boundary(&boundary_tokens, start, target, n)
            };

            // Slice up to the next token's start (or text end) so trailing
            // punctuation stays with its sentence.
            let byte_start = words[start].0;
            let byte_end = if end < n { words[end].0 } else { text.len() };
            let content = text[byte_start..byte_end].trim_end().to_string();

            chunks.push(ChunkDraft {
                index,
                content,
                token_count: end - start,
            });

            if end >= n {
                break;
            }
            start = (end - self.overlap_tokens.min(end)).max(start + 1);
            index += 1;
        }

        chunks
    }

    /// Token indices that begin a sentence
    fn sentence_start_tokens(&self, text: &str, words: &[(usize, &str)]) -> Vec<usize> {
        let starts: Vec<usize> = words.iter().map(|(byte, _)| *byte).collect();
        let mut token_indices = Vec::new();

        for (byte_pos, _) in text.split_sentence_bound_indices() {
            // First token at or after the sentence boundary.
            let idx = starts.partition_point(|&s| s < byte_pos);
            if idx < starts.len() {
                if token_indices.last() != Some(&idx) {
                    token_indices.push(idx);
                }
            }
        }

        token_indices
    }

    /// Nearest sentence-start token to `target` within the window, if any
    fn pick_boundary(
        &self,
        boundaries: &[usize],
        start: usize,
        target: usize,
        n: usize,
    ) -> usize {
        let low = target.saturating_sub(self.boundary_window).max(start + 1);
        let high = (target + self.boundary_window).min(n);

        let best = boundaries
            .iter()
            .copied()
            .filter(|&b| b >= low && b <= high)
            .min_by_key(|&b| b.abs_diff(target));

        best.unwrap_or(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk: usize, overlap: usize, window: usize) -> TokenChunker {
        TokenChunker::new(chunk, overlap, window)
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunker(800, 80, 100).split("").is_empty());
        assert!(chunker(800, 80, 100).split("  \n ").is_empty());
    }

    #[test]
    fn test_single_token_yields_one_chunk() {
        let chunks = chunker(800, 80, 100).split("hello");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "hello");
        assert_eq!(chunks[0].token_count, 1);
    }

    #[test]
    fn test_chunk_size_plus_one_yields_two_chunks_with_overlap() {
        let words: Vec<String> = (0..11).map(|i| format!("word{i}")).collect();
        let text = words.join(" ");

        let chunks = chunker(10, 2, 0).split(&text);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].token_count, 10);
        // Second chunk starts two tokens back: word8 word9 word10.
        assert_eq!(chunks[1].token_count, 3);
        assert!(chunks[1].content.starts_with("word8"));
        assert!(chunks[1].content.ends_with("word10"));
    }

    #[test]
    fn test_indexes_are_dense_from_zero() {
        let text = (0..100)
            .map(|i| format!("token{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunker(10, 2, 0).split(&text);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_no_chunk_exceeds_size() {
        let text = (0..500)
            .map(|i| format!("w{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = chunker(50, 5, 10);

        for chunk in splitter.split(&text) {
            assert!(chunk.token_count <= 50 + 10, "chunk too large");
        }
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        // Eight tokens per sentence; target 10 with window 4 should snap the
        // first split to a sentence start rather than cutting mid-sentence.
        let text = "One two three four five six seven eight. \
                    Alpha beta gamma delta epsilon zeta eta theta. \
                    Red orange yellow green blue indigo violet mauve.";

        let chunks = chunker(10, 0, 4).split(text);
        assert!(chunks.len() >= 2);
        assert!(
            chunks[1].content.starts_with("Alpha") || chunks[1].content.starts_with("Red"),
            "second chunk should start at a sentence boundary, got: {}",
            chunks[1].content
        );
    }

    #[test]
    fn test_all_tokens_covered() {
        let words: Vec<String> = (0..97).map(|i| format!("tok{i}")).collect();
        let text = words.join(" ");
        let chunks = chunker(10, 3, 0).split(&text);

        let joined: String = chunks
            .iter()
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        for word in &words {
            assert!(joined.contains(word.as_str()), "missing token {word}");
        }
    }

    #[test]
    fn test_trailing_punctuation_is_kept() {
        let chunks = chunker(800, 80, 100).split("The end is here.");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.ends_with('.'));
    }

    #[test]
    fn test_count_tokens_matches_chunker() {
        let text = "Count these five tokens now";
        assert_eq!(count_tokens(text), 5);
    }
}
