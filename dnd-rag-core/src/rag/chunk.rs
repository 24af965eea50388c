//! Splitting long texts into overlapping, retrievable chunks.

/// Character-based chunker with overlap.
///
/// A chunk is cut at `size` characters unless a paragraph or sentence break
/// falls within the last `overlap` characters before that cut, in which case
/// the chunk ends at the break instead. Consecutive chunks share up to
/// `overlap` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `overlap` is clamped below `size`.
    pub fn new(size: usize, overlap: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            overlap: overlap.min(size - 1),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let hard_end = (start + self.size).min(len);
            let end = if hard_end < len {
                let window_start = hard_end.saturating_sub(self.overlap).max(start + 1);
                soft_break(&chars, window_start, hard_end).unwrap_or(hard_end)
            } else {
                hard_end
            };

            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }

            if end >= len {
                break;
            }
            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

/// Latest cut position in `from..=to`, preferring paragraph breaks over sentence ends.
fn soft_break(chars: &[char], from: usize, to: usize) -> Option<usize> {
    let paragraph = (from..=to)
        .rev()
        .find(|&cut| cut >= 2 && chars[cut - 2] == '\n' && chars[cut - 1] == '\n');
    if paragraph.is_some() {
        return paragraph;
    }

    (from..=to).rev().find(|&cut| {
        cut >= 1
            && matches!(chars[cut - 1], '.' | '!' | '?')
            && chars.get(cut).is_some_and(|c| c.is_whitespace())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunker = Chunker::new(500, 50);
        assert_eq!(chunker.split("  A single tavern.  "), vec!["A single tavern."]);
        assert!(chunker.split("   ").is_empty());
        assert!(chunker.split("").is_empty());
    }

    #[test]
    fn test_overlap_clamped() {
        let chunker = Chunker::new(10, 40);
        assert_eq!(chunker.overlap(), 9);
        assert_eq!(Chunker::new(0, 0).size(), 1);
    }

    #[test]
    fn test_prefers_sentence_break() {
        let text = "The orc charges at the gate. Guards scramble to the walls and ready their bows.";
        let chunker = Chunker::new(40, 15);
        let chunks = chunker.split(text);

        assert_eq!(chunks[0], "The orc charges at the gate.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));
        assert!(chunks.last().unwrap().ends_with("bows."));
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = "First the road. Then the bridge\n\nThe keep rises above the mist and the ravens circle.";
        let chunker = Chunker::new(40, 12);
        let chunks = chunker.split(text);
        assert_eq!(chunks[0], "First the road. Then the bridge");
    }

    #[test]
    fn test_hard_cut_without_breaks() {
        let text = "a".repeat(25);
        let chunks = Chunker::new(10, 3).split(&text);

        assert_eq!(chunks[0].len(), 10);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        // Overlapping windows cover more than the source length.
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert!(total > 25);
    }

    #[test]
    fn test_consecutive_chunks_overlap() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = Chunker::new(10, 4).split(text);
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "ghijklmnop");
        assert!(chunks.last().unwrap().ends_with('z'));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "Ælfred’s sword glows. Þe runes flare brightly!";
        let chunks = Chunker::new(24, 8).split(text);
        assert_eq!(chunks[0], "Ælfred’s sword glows.");
    }
}
