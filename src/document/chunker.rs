//! Overlapping fixed-size text chunks with opportunistic boundary snapping.
//!
//! Lengths and offsets are counted in characters. Every character of a
//! document lands in at least one chunk, and consecutive chunks share up to
//! `chunk_overlap` characters.

use std::iter::FusedIterator;

use super::Document;
use crate::config::ChunkingConfig;
use crate::error::ConfigError;

/// Preferred cut points, strongest first. A cut lands right after the
/// separator so it stays with the preceding chunk.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "? ", "! ", " "];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// Source URL of the owning document.
    pub source: String,
    pub document_index: usize,
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Character offset of the first character in the document.
    pub start_index: usize,
    /// Character offset one past the last character.
    pub end_index: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TextSplitter {
    config: ChunkingConfig,
}

impl TextSplitter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    pub fn with_sizes(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ConfigError> {
        Ok(Self::new(ChunkingConfig::new(chunk_size, chunk_overlap)?))
    }

    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Lazily chunks every document in order. Calling this again restarts
    /// from the first document.
    pub fn split<'a>(&self, documents: &'a [Document]) -> Chunks<'a> {
        Chunks {
            splitter: *self,
            documents,
            document_index: 0,
            current: None,
        }
    }

    /// Character ranges of the chunks of a single text.
    pub fn split_text<'a>(&self, text: &'a str) -> TextWindows<'a> {
        TextWindows::new(text, self.config)
    }
}

/// Iterator over `(start, end, slice)` windows of one text.
#[derive(Debug, Clone)]
pub struct TextWindows<'a> {
    text: &'a str,
    chars: Vec<char>,
    // byte offset of each char, plus text.len() at the end
    offsets: Vec<usize>,
    chunk_size: usize,
    overlap: usize,
    next_start: Option<usize>,
}

impl<'a> TextWindows<'a> {
    fn new(text: &'a str, config: ChunkingConfig) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut offsets = Vec::with_capacity(text.len() + 1);
        for (offset, c) in text.char_indices() {
            chars.push(c);
            offsets.push(offset);
        }
        offsets.push(text.len());

        Self {
            text,
            next_start: if chars.is_empty() { None } else { Some(0) },
            chars,
            offsets,
            chunk_size: config.chunk_size(),
            overlap: config.chunk_overlap(),
        }
    }

    fn ends_with_at(&self, end: usize, separator: &str) -> bool {
        let len = separator.chars().count();
        end >= len && self.chars[end - len..end].iter().copied().eq(separator.chars())
    }

    /// Latest separator cut in `(lower, end]`, trying stronger separators first.
    fn find_cut(&self, start: usize, end: usize) -> Option<usize> {
        let lower = start + self.overlap.max(self.chunk_size / 2);
        if lower >= end {
            return None;
        }
        SEPARATORS.iter().find_map(|separator| {
            (lower + 1..=end)
                .rev()
                .find(|&cut| self.ends_with_at(cut, separator))
        })
    }

    fn is_word_start(&self, index: usize) -> bool {
        index == 0 || (self.chars[index - 1].is_whitespace() && !self.chars[index].is_whitespace())
    }
}

impl<'a> Iterator for TextWindows<'a> {
    type Item = (usize, usize, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let total = self.chars.len();
        let hard_end = (start + self.chunk_size).min(total);

        let end = if hard_end == total {
            total
        } else {
            self.find_cut(start, hard_end).unwrap_or(hard_end)
        };

        self.next_start = if end == total {
            None
        } else {
            // end > start + overlap holds for hard and snapped cuts alike
            let back = end - self.overlap;
            let snapped = (back..end).find(|&i| self.is_word_start(i)).unwrap_or(back);
            Some(snapped)
        };

        let slice = &self.text[self.offsets[start]..self.offsets[end]];
        Some((start, end, slice))
    }
}

impl FusedIterator for TextWindows<'_> {}

/// Lazy chunk stream over a set of documents.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    splitter: TextSplitter,
    documents: &'a [Document],
    document_index: usize,
    current: Option<(TextWindows<'a>, usize)>,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            if let Some((windows, chunk_index)) = self.current.as_mut() {
                if let Some((start, end, text)) = windows.next() {
                    let document = &self.documents[self.document_index];
                    let chunk = Chunk {
                        text: text.to_string(),
                        source: document.metadata.source.clone(),
                        document_index: self.document_index,
                        chunk_index: *chunk_index,
                        start_index: start,
                        end_index: end,
                    };
                    *chunk_index += 1;
                    return Some(chunk);
                }
                self.current = None;
                self.document_index += 1;
            }

            let documents = self.documents;
            let document = documents.get(self.document_index)?;
            self.current = Some((self.splitter.split_text(&document.page_content), 0));
        }
    }
}

impl FusedIterator for Chunks<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_covers(text: &str, windows: &[(usize, usize, &str)], chunk_size: usize) {
        let total = text.chars().count();
        let mut covered_to = 0;
        for (i, &(start, end, slice)) in windows.iter().enumerate() {
            assert!(start <= covered_to, "gap before chunk {} ({} > {})", i, start, covered_to);
            assert!(end > start);
            assert!(end - start <= chunk_size);
            assert_eq!(slice.chars().count(), end - start);
            let expected: String = text.chars().skip(start).take(end - start).collect();
            assert_eq!(slice, expected);
            covered_to = covered_to.max(end);
        }
        assert_eq!(covered_to, total);
    }

    #[test]
    fn short_text_is_one_chunk() {
        let splitter = TextSplitter::with_sizes(100, 20).unwrap();
        let windows: Vec<_> = splitter.split_text("A single short paragraph.").collect();
        assert_eq!(windows, vec![(0, 25, "A single short paragraph.")]);
    }

    #[test]
    fn empty_text_has_no_chunks() {
        let splitter = TextSplitter::with_sizes(100, 20).unwrap();
        assert_eq!(splitter.split_text("").count(), 0);
    }

    #[test]
    fn hard_cuts_advance_by_size_minus_overlap() {
        let text = "x".repeat(25);
        let splitter = TextSplitter::with_sizes(10, 3).unwrap();
        let ranges: Vec<_> = splitter.split_text(&text).map(|(s, e, _)| (s, e)).collect();
        assert_eq!(ranges, vec![(0, 10), (7, 17), (14, 24), (21, 25)]);
    }

    #[test]
    fn prefers_paragraph_boundaries() {
        let text = "First paragraph is here.\n\nSecond paragraph follows on.";
        let splitter = TextSplitter::with_sizes(40, 0).unwrap();
        let windows: Vec<_> = splitter.split_text(text).collect();
        assert_eq!(windows[0].2, "First paragraph is here.\n\n");
        assert_eq!(windows[1].2, "Second paragraph follows on.");
    }

    #[test]
    fn overlap_starts_on_a_word() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let splitter = TextSplitter::with_sizes(20, 8).unwrap();
        let windows: Vec<_> = splitter.split_text(text).collect();
        for &(start, _, slice) in windows.iter().skip(1) {
            let previous = text.chars().nth(start - 1).unwrap();
            assert!(previous == ' ', "chunk {:?} starts mid-word", slice);
        }
        assert_covers(text, &windows, 20);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "é".repeat(12);
        let splitter = TextSplitter::with_sizes(5, 1).unwrap();
        let windows: Vec<_> = splitter.split_text(&text).collect();
        assert_covers(&text, &windows, 5);
        assert!(windows.iter().all(|(_, _, s)| s.chars().count() <= 5));
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert!(matches!(
            TextSplitter::with_sizes(10, 10),
            Err(ConfigError::ChunkOverlap { .. })
        ));
        assert!(matches!(
            TextSplitter::with_sizes(10, 12),
            Err(ConfigError::ChunkOverlap { .. })
        ));
        assert!(matches!(TextSplitter::with_sizes(0, 0), Err(ConfigError::ChunkSize)));
    }

    #[test]
    fn largest_overlap_still_advances() {
        let text = "x".repeat(30);
        let splitter = TextSplitter::new(ChunkingConfig::new(10, 9).unwrap());
        let windows: Vec<_> = splitter.split_text(&text).take(100).collect();
        assert!(windows.len() < 100);
        for pair in windows.windows(2) {
            assert!(pair[1].0 > pair[0].0);
        }
        assert_covers(&text, &windows, 10);
    }

    #[test]
    fn split_is_restartable_and_tracks_documents() {
        let documents = vec![
            Document::new("one two three four five six", "https://a.example"),
            Document::new("", "https://empty.example"),
            Document::new("seven eight nine", "https://b.example"),
        ];
        let splitter = TextSplitter::with_sizes(12, 4).unwrap();
        let first: Vec<Chunk> = splitter.split(&documents).collect();
        let second: Vec<Chunk> = splitter.split(&documents).collect();
        assert_eq!(first, second);
        assert!(first.iter().all(|c| c.source != "https://empty.example"));
        let last = first.last().unwrap();
        assert_eq!(last.document_index, 2);
        assert_eq!(last.source, "https://b.example");
        assert_eq!(first[0].chunk_index, 0);
        assert_eq!(first[1].chunk_index, 1);
    }

    proptest! {
        #[test]
        fn chunks_cover_text_without_gaps(
            text in "[a-z .\n?!]{0,400}",
            chunk_size in 1usize..60,
            overlap_seed in 0usize..60,
        ) {
            let overlap = overlap_seed % chunk_size;
            let splitter = TextSplitter::with_sizes(chunk_size, overlap).unwrap();
            let windows: Vec<_> = splitter.split_text(&text).collect();
            if text.is_empty() {
                prop_assert!(windows.is_empty());
            } else {
                assert_covers(&text, &windows, chunk_size);
            }
        }

        #[test]
        fn chunk_count_is_deterministic(text in "[a-z \n]{0,300}") {
            let splitter = TextSplitter::with_sizes(50, 10).unwrap();
            let documents = vec![Document::new(text, "https://example.com")];
            prop_assert_eq!(splitter.split(&documents).count(), splitter.split(&documents).count());
        }
    }
}
