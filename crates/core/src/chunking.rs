use crate::models::{chunk_id, BaseMetadata, ChunkRecord, ChunkingOptions};

/// Separators tried in order; the empty separator splits into characters.
pub const SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Splits `text` into chunks of at most `chunk_size` characters where a
/// separator allows it, carrying up to `overlap` characters of trailing parts
/// into the next chunk. Empty and whitespace-only chunks are dropped.
///
/// A chunk flushed at a split point does not keep the separator it was split
/// on: parts are rejoined with the separator only between each other.
///
/// The carried overlap is not re-checked against `chunk_size`, so a chunk
/// that starts with carried parts can exceed it by the carried length plus
/// one separator.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let raw_chunks = if char_len(text) <= chunk_size {
        vec![text.to_string()]
    } else {
        split_recursive(text, &SEPARATORS, chunk_size.max(1), overlap)
    };

    raw_chunks
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

pub fn chunk_with_options(text: &str, options: ChunkingOptions) -> Vec<String> {
    chunk_text(text, options.chunk_size, options.overlap)
}

fn split_recursive(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let Some((&separator, finer)) = separators.split_first() else {
        return vec![text.to_string()];
    };

    let parts: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect()
    } else {
        text.split(separator).collect()
    };

    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut buffer = PartBuffer::new(separator_len);

    for part in parts {
        let part_len = char_len(part);

        if part_len > chunk_size && !finer.is_empty() {
            if !buffer.is_empty() {
                chunks.push(buffer.join(separator));
                buffer.clear();
            }
            chunks.extend(split_recursive(part, finer, chunk_size, overlap));
            continue;
        }

        if !buffer.is_empty() && buffer.len_with(part_len) > chunk_size {
            chunks.push(buffer.join(separator));
            buffer = buffer.carry_over(overlap);
        }

        buffer.push(part, part_len);
    }

    if !buffer.is_empty() {
        chunks.push(buffer.join(separator));
    }

    chunks
}

/// Pending parts of the chunk being built, with their joined length in chars.
struct PartBuffer<'a> {
    parts: Vec<(&'a str, usize)>,
    joined_len: usize,
    separator_len: usize,
}

impl<'a> PartBuffer<'a> {
    fn new(separator_len: usize) -> Self {
        Self {
            parts: Vec::new(),
            joined_len: 0,
            separator_len,
        }
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn clear(&mut self) {
        self.parts.clear();
        self.joined_len = 0;
    }

    fn len_with(&self, part_len: usize) -> usize {
        if self.parts.is_empty() {
            part_len
        } else {
            self.joined_len + self.separator_len + part_len
        }
    }

    fn push(&mut self, part: &'a str, part_len: usize) {
        self.joined_len = self.len_with(part_len);
        self.parts.push((part, part_len));
    }

    fn join(&self, separator: &str) -> String {
        self.parts
            .iter()
            .map(|(part, _)| *part)
            .collect::<Vec<_>>()
            .join(separator)
    }

    /// Trailing parts whose joined length stays within `overlap`.
    fn carry_over(&self, overlap: usize) -> Self {
        let mut carried = Self::new(self.separator_len);
        if overlap == 0 {
            return carried;
        }

        let mut kept = Vec::new();
        let mut kept_len = 0usize;
        for &(part, part_len) in self.parts.iter().rev() {
            let next_len = if kept.is_empty() {
                part_len
            } else {
                kept_len + self.separator_len + part_len
            };
            if next_len > overlap {
                break;
            }
            kept_len = next_len;
            kept.push((part, part_len));
        }

        for (part, part_len) in kept.into_iter().rev() {
            carried.push(part, part_len);
        }
        carried
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Numbers non-empty chunks contiguously from zero and attaches the base
/// metadata of their file.
pub fn build_chunk_records(chunks: &[String], base: &BaseMetadata) -> Vec<ChunkRecord> {
    chunks
        .iter()
        .filter(|text| !text.trim().is_empty())
        .enumerate()
        .map(|(index, text)| {
            let index = index as u64;
            ChunkRecord {
                id: chunk_id(&base.filename, index),
                text: text.clone(),
                metadata: base.for_chunk(index),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunk_text("Short text.", 100, 10), vec!["Short text."]);
        let exact = "x".repeat(40);
        assert_eq!(chunk_text(&exact, 40, 5), vec![exact.clone()]);
    }

    #[test]
    fn splits_on_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        assert_eq!(chunk_text(&text, 80, 0), vec!["a".repeat(60), "b".repeat(60)]);
    }

    #[test]
    fn sentence_split_drops_boundary_separator() {
        let text = "First sentence. Second sentence. Third sentence.";
        let chunks = chunk_text(text, 30, 0);
        assert_eq!(
            chunks,
            vec!["First sentence", "Second sentence", "Third sentence."]
        );
    }

    #[test]
    fn overlap_carries_one_word_back() {
        let chunks = chunk_text("word1 word2 word3 word4", 12, 6);
        assert_eq!(chunks, vec!["word1 word2", "word2 word3", "word3 word4"]);
    }

    #[test]
    fn zero_overlap_starts_next_chunk_empty() {
        let chunks = chunk_text("word1 word2 word3 word4", 12, 0);
        assert_eq!(chunks, vec!["word1 word2", "word3 word4"]);
    }

    #[test]
    fn carried_overlap_may_push_a_chunk_past_the_size() {
        let chunks = chunk_text("aaaa bbbbb cccccccc", 10, 9);
        assert_eq!(chunks, vec!["aaaa bbbbb", "bbbbb cccccccc"]);
        let lengths: Vec<usize> = chunks.iter().map(|chunk| chunk.chars().count()).collect();
        assert_eq!(lengths, vec![10, 14]);
    }

    #[test]
    fn falls_back_to_characters() {
        assert_eq!(chunk_text("abcdefghij", 3, 0), vec!["abc", "def", "ghi", "j"]);
    }

    #[test]
    fn empty_parts_are_filtered_at_the_end() {
        let chunks = chunk_text("Para1\n\n\n\nPara2", 5, 0);
        assert_eq!(chunks, vec!["Para1", "Para2"]);
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        assert!(chunk_text("", 10, 0).is_empty());
        assert!(chunk_text("   \n\n  ", 10, 0).is_empty());
    }

    #[test]
    fn lengths_are_counted_in_characters() {
        let text = "שלום כיתה א. שלום כיתה ב.";
        let chunks = chunk_text(text, 15, 0);
        assert_eq!(chunks, vec!["שלום כיתה א", "שלום כיתה ב."]);
    }

    #[test]
    fn oversized_part_is_split_with_finer_separators() {
        let long_paragraph = "one two three four five six";
        let text = format!("intro\n\n{long_paragraph}");
        let chunks = chunk_text(&text, 10, 0);
        assert_eq!(chunks, vec!["intro", "one two", "three four", "five six"]);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
    }

    #[test]
    fn chunks_are_never_blank() {
        let text = "alpha\n\n \n\nbeta gamma\n\n\n\n\ndelta. epsilon zeta eta";
        for size in 1..12 {
            for overlap in 0..4 {
                let chunks = chunk_text(text, size, overlap);
                assert!(chunks.iter().all(|chunk| !chunk.trim().is_empty()));
            }
        }
    }

    #[test]
    fn records_are_numbered_contiguously() {
        let base = BaseMetadata {
            filename: "f.pdf".to_string(),
            created_at: "2024-05-01T10:00:00".to_string(),
            page_count: 3,
            file_hash: Some("h".to_string()),
            ocr: false,
        };
        let chunks = vec!["one".to_string(), "  ".to_string(), "two".to_string()];

        let records = build_chunk_records(&chunks, &base);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "f.pdf_part_0");
        assert_eq!(records[1].id, "f.pdf_part_1");
        assert_eq!(records[1].metadata.chunk_index, 1);
        assert_eq!(records[1].text, "two");
        assert_eq!(records[1].metadata.file_hash.as_deref(), Some("h"));
    }
}
