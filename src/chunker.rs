//! Markdown-aware chunking: splits a document body into located text chunks
//! bounded by soft/hard limits, tracking heading context and byte offsets.
//!
//! Chunkers are deterministic: identical input always yields identical
//! chunks, which keeps rebuilds reproducible.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ChunkLoc;

pub const DEFAULT_SOFT_LIMIT: usize = 4096;
pub const DEFAULT_HARD_LIMIT: usize = 8192;

/// A located chunk before indexing metadata is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocAndText {
    pub loc: ChunkLoc,
    pub text: String,
}

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading regex"));

// Horizontal whitespace only: newlines are preserved so code blocks and
// structured content retain visual structure.
static HSPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").expect("hspace regex"));
static BLANK_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank-run regex"));

/// Split markdown content by headings and blank lines, respecting soft/hard
/// scalar limits with sentence-boundary breaking. Never fails: invalid or
/// empty input yields an empty chunk list.
///
/// Offsets are byte offsets into `content` and are block-granular: every
/// sub-chunk emitted from one oversized block shares the parent block's
/// `start_char`/`end_char`.
pub fn split_markdown_chunks(
    content: &str,
    soft_limit: usize,
    hard_limit: usize,
) -> Vec<ChunkLocAndText> {
    let soft_limit = if soft_limit == 0 {
        DEFAULT_SOFT_LIMIT
    } else {
        soft_limit
    };
    let hard_limit = if hard_limit == 0 {
        DEFAULT_HARD_LIMIT
    } else {
        hard_limit
    };

    let mut chunks: Vec<ChunkLocAndText> = Vec::with_capacity(32);
    let mut heading_path = String::new();
    let mut cursor = 0usize;
    let mut start = 0usize;
    let mut buf = String::new();

    for line in content.split('\n') {
        let line_len = line.len() + 1; // + newline
        let trimmed = line.trim();

        if let Some(caps) = HEADING_RE.captures(trimmed) {
            flush_block(
                &mut chunks,
                &mut buf,
                &mut start,
                cursor,
                &heading_path,
                soft_limit,
                hard_limit,
            );
            heading_path = caps[2].to_string();
            cursor += line_len;
            continue;
        }

        if trimmed.is_empty() {
            flush_block(
                &mut chunks,
                &mut buf,
                &mut start,
                cursor,
                &heading_path,
                soft_limit,
                hard_limit,
            );
            cursor += line_len;
            continue;
        }

        if !buf.is_empty() {
            buf.push('\n');
        }
        buf.push_str(line);
        cursor += line_len;
    }

    flush_block(
        &mut chunks,
        &mut buf,
        &mut start,
        cursor,
        &heading_path,
        soft_limit,
        hard_limit,
    );
    chunks
}

/// Emit one or more chunks from the accumulated block. Oversized blocks are
/// split greedily at the soft limit (hard limit when the block exceeds it),
/// preferring a sentence terminator found in the upper half of the window.
fn flush_block(
    chunks: &mut Vec<ChunkLocAndText>,
    buf: &mut String,
    start: &mut usize,
    end: usize,
    heading_path: &str,
    soft_limit: usize,
    hard_limit: usize,
) {
    let mut text = buf.trim().to_string();
    if text.is_empty() {
        buf.clear();
        *start = end;
        return;
    }

    while !text.is_empty() {
        let runes: Vec<char> = text.chars().collect();
        let rune_soft = soft_limit.min(runes.len());
        let rune_hard = hard_limit.min(runes.len());

        let mut limit = if runes.len() > rune_hard {
            rune_hard
        } else if runes.len() <= rune_soft {
            runes.len()
        } else {
            rune_soft
        };

        // Prefer a sentence boundary (. ! ?) within the soft window.
        if limit < runes.len() {
            let floor = limit / 2;
            let mut best_break = None;
            for i in (floor..limit).rev() {
                if matches!(runes[i], '.' | '!' | '?') {
                    best_break = Some(i + 1);
                    break;
                }
            }
            if let Some(b) = best_break {
                limit = b;
            }
        }

        let part: String = runes[..limit].iter().collect();
        chunks.push(ChunkLocAndText {
            loc: ChunkLoc {
                heading_path: heading_path.to_string(),
                start_char: *start,
                end_char: end,
            },
            text: part.trim().to_string(),
        });

        if limit >= runes.len() {
            text.clear();
        } else {
            text = runes[limit..].iter().collect::<String>().trim().to_string();
        }
    }

    buf.clear();
    *start = end;
}

/// Split content into fixed-size scalar chunks, breaking at whitespace within
/// the last quarter of the window when possible. Used by evaluation tooling,
/// not by default ingestion.
pub fn split_fixed_size_chunks(content: &str, size: usize) -> Vec<ChunkLocAndText> {
    let size = if size == 0 { 1024 } else { size };
    let runes: Vec<char> = content.chars().collect();
    let mut chunks = Vec::with_capacity(runes.len() / size + 1);
    let mut pos = 0usize;

    while pos < runes.len() {
        let mut end = (pos + size).min(runes.len());

        if end < runes.len() {
            let floor = end.saturating_sub(size / 4).max(pos);
            let mut best = None;
            for i in (floor..end).rev() {
                if matches!(runes[i], ' ' | '\n' | '\t') {
                    best = Some(i + 1);
                    break;
                }
            }
            if let Some(b) = best {
                if b > pos {
                    end = b;
                }
            }
        }

        let text: String = runes[pos..end].iter().collect::<String>().trim().to_string();
        if !text.is_empty() {
            let byte_start: usize = runes[..pos].iter().map(|c| c.len_utf8()).sum();
            let byte_end: usize = runes[..end].iter().map(|c| c.len_utf8()).sum();
            chunks.push(ChunkLocAndText {
                loc: ChunkLoc {
                    heading_path: String::new(),
                    start_char: byte_start,
                    end_char: byte_end,
                },
                text,
            });
        }
        pos = end;
    }
    chunks
}

/// Normalize chunk text before storage and fingerprinting: CRLF to LF,
/// horizontal whitespace runs to a single space, 3+ newlines to exactly two,
/// trimmed.
pub fn normalize_text(s: &str) -> String {
    let s = s.replace("\r\n", "\n");
    let s = s.trim();
    let s = HSPACE_RE.replace_all(s, " ");
    let s = BLANK_RUN_RE.replace_all(&s, "\n\n");
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_markdown_chunks("", 4096, 8192).is_empty());
        assert!(split_markdown_chunks("   \n\n  \n", 4096, 8192).is_empty());
    }

    #[test]
    fn heading_updates_context() {
        let body = "# Setup\n\nInstall the thing.\n\n## Usage\n\nRun the thing.\n";
        let chunks = split_markdown_chunks(body, 4096, 8192);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].loc.heading_path, "Setup");
        assert_eq!(chunks[0].text, "Install the thing.");
        assert_eq!(chunks[1].loc.heading_path, "Usage");
        assert_eq!(chunks[1].text, "Run the thing.");
    }

    #[test]
    fn heading_keeps_title_without_level_prefix() {
        let chunks = split_markdown_chunks("### Deep Title\n\ncontent\n", 4096, 8192);
        assert_eq!(chunks[0].loc.heading_path, "Deep Title");
    }

    #[test]
    fn blank_lines_separate_blocks() {
        let body = "first paragraph\n\nsecond paragraph\n";
        let chunks = split_markdown_chunks(body, 4096, 8192);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "first paragraph");
        assert_eq!(chunks[1].text, "second paragraph");
    }

    #[test]
    fn adjacent_lines_join_into_one_block() {
        let body = "line one\nline two\nline three\n";
        let chunks = split_markdown_chunks(body, 4096, 8192);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "line one\nline two\nline three");
    }

    #[test]
    fn long_block_splits_within_hard_limit() {
        // "word " x 2000 = 10000 scalars under a single heading.
        let body = format!("# Long\n\n{}\n", "word ".repeat(2000).trim());
        let chunks = split_markdown_chunks(&body, 512, 1024);

        assert!(chunks.len() >= 2, "expected multiple chunks");
        for c in &chunks {
            assert!(c.text.chars().count() <= 1024, "chunk exceeds hard limit");
            assert_eq!(c.loc.heading_path, "Long");
        }

        // Cumulative text preserves every word in order.
        let joined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.text.split_whitespace())
            .collect();
        assert_eq!(joined.len(), 2000);
        assert!(joined.iter().all(|w| *w == "word"));
    }

    #[test]
    fn sentence_boundary_preferred_over_mid_word_cut() {
        let first = "Sentence number one ends here.";
        let body = format!("{} {}", first, "and then trailing words without period");
        let chunks = split_markdown_chunks(&body, 40, 8192);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].text, first);
    }

    #[test]
    fn sub_chunks_share_parent_block_offsets() {
        let body = "word ".repeat(300);
        let chunks = split_markdown_chunks(&body, 100, 200);
        assert!(chunks.len() > 1);
        let first = &chunks[0].loc;
        for c in &chunks {
            assert_eq!(c.loc.start_char, first.start_char);
            assert_eq!(c.loc.end_char, first.end_char);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let body = format!("# H\n\n{}\n\nmore text\n", "alpha beta gamma. ".repeat(100));
        let a = split_markdown_chunks(&body, 128, 256);
        let b = split_markdown_chunks(&body, 128, 256);
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_size_snaps_to_whitespace() {
        let content = "aaaa bbbb cccc dddd eeee";
        let chunks = split_fixed_size_chunks(content, 10);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.text.chars().count() <= 10);
        }
        let rejoined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.text.split_whitespace())
            .collect();
        assert_eq!(rejoined, vec!["aaaa", "bbbb", "cccc", "dddd", "eeee"]);
    }

    #[test]
    fn fixed_size_offsets_are_byte_positions() {
        let content = "abcd efgh";
        let chunks = split_fixed_size_chunks(content, 5);
        assert_eq!(chunks[0].loc.start_char, 0);
        assert!(chunks[0].loc.end_char <= content.len());
    }

    #[test]
    fn normalize_collapses_horizontal_whitespace() {
        assert_eq!(normalize_text("a \t  b"), "a b");
        assert_eq!(normalize_text("  padded  "), "padded");
    }

    #[test]
    fn normalize_preserves_single_newlines() {
        assert_eq!(normalize_text("a\nb"), "a\nb");
        assert_eq!(normalize_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn normalize_collapses_blank_line_runs() {
        assert_eq!(normalize_text("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn normalize_converts_crlf() {
        assert_eq!(normalize_text("a\r\nb"), "a\nb");
    }
}
