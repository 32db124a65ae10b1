//! Recursive boundary-preferring text splitter.
//!
//! Splits document text into bounded, overlapping segments, preferring to break at
//! paragraph boundaries, then lines, then sentence-ending punctuation, then words, and only
//! as a last resort mid-word. Separator priority falls back one level at a time, only for
//! pieces a higher-priority separator cannot fit into the size limit. The splitter is
//! deterministic: the same text and settings always produce the same chunk boundaries.

/// Separators tried in priority order; the empty string means a hard character split.
const SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?", ";", ",", " ", ""];

/// Character-budgeted recursive splitter.
#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Create a splitter with the given size and overlap, both counted in characters.
    ///
    /// The overlap is clamped below the chunk size so forward progress is always possible.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    /// Split text into trimmed, non-empty chunks in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        self.split_recursive(text, SEPARATORS)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, rest) = pick_separator(text, separators);

        if separator.is_empty() {
            return self.hard_split(text);
        }

        let pieces = split_keeping_separator(text, separator);
        let mut chunks = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for piece in pieces {
            let piece_len = piece.chars().count();

            if piece_len > self.chunk_size {
                // The piece itself is oversized: flush what we have and descend one
                // separator level for this piece alone.
                if !current.is_empty() {
                    chunks.push(current.concat());
                    current.clear();
                    current_len = 0;
                }
                chunks.extend(self.split_recursive(&piece, rest));
                continue;
            }

            if current_len + piece_len > self.chunk_size && !current.is_empty() {
                chunks.push(current.concat());
                // Retain a tail of previous pieces as the overlap window.
                while current_len > self.chunk_overlap
                    || (current_len + piece_len > self.chunk_size && current_len > 0)
                {
                    let removed = current.remove(0);
                    current_len -= removed.chars().count();
                }
            }

            current_len += piece_len;
            current.push(piece);
        }

        if !current.is_empty() {
            chunks.push(current.concat());
        }

        chunks
    }

    /// Last-resort split into fixed character windows stepping by `size - overlap`.
    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = (self.chunk_size - self.chunk_overlap).max(1);
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            chunks.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }

        chunks
    }
}

/// First separator present in the text, or the final hard-split fallback.
fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (idx, separator) in separators.iter().enumerate() {
        if separator.is_empty() || text.contains(separator) {
            return (separator, &separators[idx + 1..]);
        }
    }
    ("", &[])
}

/// Split on a separator, keeping the separator attached to the preceding piece so
/// sentence punctuation and blank lines stay with the text they terminate.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = text;

    while let Some(position) = remaining.find(separator) {
        let split_at = position + separator.len();
        let (piece, rest) = remaining.split_at(split_at);
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = rest;
    }

    if !remaining.is_empty() {
        pieces.push(remaining.to_string());
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_text(words: usize) -> String {
        (0..words)
            .map(|idx| format!("word{idx:04}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn empty_and_whitespace_input_yield_no_chunks() {
        let splitter = TextSplitter::new(800, 100);
        assert!(splitter.split("").is_empty());
        assert!(splitter.split("   \n\n  ").is_empty());
    }

    #[test]
    fn short_text_stays_one_chunk() {
        let splitter = TextSplitter::new(800, 100);
        let chunks = splitter.split("A short paragraph that easily fits.");
        assert_eq!(chunks, vec!["A short paragraph that easily fits."]);
    }

    #[test]
    fn chunks_respect_size_limit() {
        let splitter = TextSplitter::new(100, 20);
        let text = word_text(80);
        for chunk in splitter.split(&text) {
            assert!(chunk.chars().count() <= 100, "oversized chunk: {chunk:?}");
        }
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let splitter = TextSplitter::new(40, 0);
        let text = "First paragraph here.\n\nSecond paragraph over there.";
        let chunks = splitter.split(text);
        assert_eq!(
            chunks,
            vec!["First paragraph here.", "Second paragraph over there."]
        );
    }

    #[test]
    fn falls_back_to_sentences_within_a_long_paragraph() {
        let splitter = TextSplitter::new(40, 0);
        let text = "One sentence goes here. Another sentence follows it. And a third one.";
        let chunks = splitter.split(text);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].starts_with("One sentence"));
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn overlap_repeats_trailing_words() {
        let splitter = TextSplitter::new(50, 20);
        let text = word_text(30);
        let chunks = splitter.split(&text);
        assert!(chunks.len() > 1);

        let first_tail: Vec<&str> = chunks[0].split_whitespace().rev().take(1).collect();
        assert!(
            chunks[1].contains(first_tail[0]),
            "expected overlap between {:?} and {:?}",
            chunks[0],
            chunks[1]
        );
    }

    #[test]
    fn splitting_is_deterministic() {
        let splitter = TextSplitter::new(120, 30);
        let text = word_text(100);
        assert_eq!(splitter.split(&text), splitter.split(&text));
    }

    #[test]
    fn two_thousand_chars_with_defaults_yield_three_chunks() {
        let splitter = TextSplitter::new(800, 100);
        // 250 8-char words joined by spaces: 2249 chars of plain prose.
        let text = word_text(250);
        let exact: String = text.chars().take(2000).collect();
        let chunks = splitter.split(exact.trim());

        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(!chunk.trim().is_empty());
            assert!(chunk.chars().count() <= 800);
        }
    }

    #[test]
    fn hard_split_handles_unbroken_runs() {
        let splitter = TextSplitter::new(10, 2);
        let text = "a".repeat(25);
        let chunks = splitter.split(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }
}
