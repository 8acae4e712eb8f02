//! Split markdown into retrieval-sized pieces.
//!
//! Token counts are approximated as four characters per token. Sections are cut
//! at level-2 headings first; a section that is still too long is windowed with
//! overlap. Pure function, no I/O.

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

const SECTION_MARKER: &str = "\n## ";
const HEADING_PREFIX: &str = "## ";

/// Split `text` into chunks of at most `max_tokens` (approximate), with
/// consecutive windows of an oversized section sharing `overlap_tokens`.
///
/// Blank input yields no chunks. Output preserves document order.
pub fn chunk(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = overlap_tokens * CHARS_PER_TOKEN;

    if !text.contains(SECTION_MARKER) && text.chars().count() <= max_chars {
        let trimmed = text.trim();
        return if trimmed.is_empty() {
            Vec::new()
        } else {
            vec![trimmed.to_string()]
        };
    }

    let mut chunks = Vec::new();
    for (i, section) in text.split(SECTION_MARKER).enumerate() {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        let section = if i > 0 {
            format!("{HEADING_PREFIX}{section}")
        } else {
            section.to_string()
        };

        if section.chars().count() <= max_chars {
            chunks.push(section);
        } else {
            chunks.extend(sliding_windows(&section, max_chars, overlap_chars));
        }
    }
    chunks
}

/// Character windows of `size` advancing by `size - overlap`, trimmed, blanks dropped.
fn sliding_windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    // An overlap as large as the window would never advance.
    let step = size.saturating_sub(overlap).max(1);

    let mut windows = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let window: String = chars[start..end].iter().collect();
        let window = window.trim();
        if !window.is_empty() {
            windows.push(window.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_blank_yield_nothing() {
        assert!(chunk("", 400, 80).is_empty());
        assert!(chunk("  \n\t ", 400, 80).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk("short", 400, 80), vec!["short".to_string()]);
    }

    #[test]
    fn headings_split_and_are_reprefixed() {
        let doc = "# Memory\nintro\n## A\nalpha body\n## B\nbeta body";
        let chunks = chunk(doc, 400, 80);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "# Memory\nintro");
        for c in &chunks[1..] {
            assert!(c.starts_with("## "), "{c:?}");
        }
        assert_eq!(chunks[1], "## A\nalpha body");
    }

    #[test]
    fn document_starting_with_heading() {
        let chunks = chunk("## A\none\n## B\ntwo", 400, 80);
        assert!(chunks.len() >= 2);
        assert!(chunks[1..].iter().all(|c| c.starts_with("## ")));
    }

    #[test]
    fn oversized_section_is_windowed_with_overlap() {
        // 10 tokens = 40 chars per window, 2 tokens = 8 chars overlap.
        let body: String = (0..100).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk(&body, 10, 2);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
        assert!(chunks.iter().all(|c| c.chars().count() <= 40));

        let first: Vec<char> = chunks[0].chars().collect();
        let second: Vec<char> = chunks[1].chars().collect();
        assert_eq!(first[32..], second[..8]);
    }

    #[test]
    fn windowing_respects_char_boundaries() {
        let body = "记忆".repeat(50);
        let chunks = chunk(&body, 5, 1);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
    }

    #[test]
    fn overlap_not_smaller_than_window_still_terminates() {
        let body = "x".repeat(100);
        let chunks = chunk(&body, 5, 5);
        assert!(!chunks.is_empty());
    }
}
