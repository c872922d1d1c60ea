//! Section chunker.
//!
//! Normalizes document sections to embedding-sized chunks. Oversized
//! sections split on paragraph boundaries; undersized trailing pieces merge
//! back into the preceding chunk of the same split run. Chunks never merge
//! across section boundaries — the caller chunks one section at a time.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::ChunkingConfig;

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{2,}").unwrap());

/// Sizing knobs, in characters.
#[derive(Debug, Clone)]
pub struct ChunkPolicy {
    pub target_size: usize,
    pub max_size: usize,
    pub min_size: usize,
    pub overlap: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            target_size: 1500,
            max_size: 3000,
            min_size: 200,
            overlap: 200,
        }
    }
}

impl From<&ChunkingConfig> for ChunkPolicy {
    fn from(cfg: &ChunkingConfig) -> Self {
        Self {
            target_size: cfg.target_size,
            max_size: cfg.max_size,
            min_size: cfg.min_size,
            overlap: cfg.overlap,
        }
    }
}

/// One embedding-ready unit of a section.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionChunk {
    /// Section id for the first chunk; `<id>-chunk-N` for subsequent ones.
    pub id: String,
    pub content: String,
    pub index: usize,
}

/// Chunk a section's content under the policy.
///
/// Sections within `max_size` pass through as a single chunk. Longer
/// sections split on paragraph boundaries into pieces near `target_size`;
/// every chunk after the first carries the last `overlap` characters of its
/// predecessor as a lead-in.
pub fn chunk_section(section_id: &str, content: &str, policy: &ChunkPolicy) -> Vec<SectionChunk> {
    if content.chars().count() <= policy.max_size {
        return vec![SectionChunk {
            id: section_id.to_string(),
            content: content.to_string(),
            index: 0,
        }];
    }

    let mut pieces = split_on_paragraphs(content, policy);
    merge_small_pieces(&mut pieces, policy);

    let mut chunks = Vec::with_capacity(pieces.len());
    for (i, piece) in pieces.iter().enumerate() {
        let (id, content) = if i == 0 {
            (section_id.to_string(), piece.clone())
        } else {
            let lead_in = char_suffix(&pieces[i - 1], policy.overlap);
            (
                format!("{}-chunk-{}", section_id, i),
                format!("{}{}", lead_in, piece),
            )
        };
        chunks.push(SectionChunk {
            id,
            content,
            index: i,
        });
    }
    chunks
}

/// Accumulate paragraphs into pieces near `target_size`, hard-splitting any
/// single paragraph that exceeds `max_size`.
fn split_on_paragraphs(content: &str, policy: &ChunkPolicy) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in PARAGRAPH_BREAK.split(content) {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let para_len = trimmed.chars().count();
        let current_len = current.chars().count();

        if current_len > 0 && current_len + 2 + para_len > policy.target_size {
            pieces.push(std::mem::take(&mut current));
        }

        if para_len > policy.max_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            for hard_piece in hard_split(trimmed, policy.target_size) {
                pieces.push(hard_piece);
            }
            continue;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(trimmed);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    if pieces.is_empty() {
        pieces.push(content.trim().to_string());
    }
    pieces
}

/// Merge pieces shorter than `min_size` into their predecessor, but only
/// when the predecessor is itself a continuation chunk (index >= 1). The
/// head piece keeps the plain section id and never absorbs a follower.
fn merge_small_pieces(pieces: &mut Vec<String>, policy: &ChunkPolicy) {
    let mut i = 2;
    while i < pieces.len() {
        if pieces[i].chars().count() < policy.min_size {
            let small = pieces.remove(i);
            let prev = &mut pieces[i - 1];
            prev.push_str("\n\n");
            prev.push_str(&small);
        } else {
            i += 1;
        }
    }
}

/// Split text at character-count boundaries, preferring whitespace breaks.
fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + size).min(chars.len());
        if end < chars.len() {
            // Back up to the nearest whitespace so words stay intact.
            let window = &chars[start..end];
            if let Some(pos) = window.iter().rposition(|c| c.is_whitespace()) {
                if pos > 0 {
                    end = start + pos + 1;
                }
            }
        }
        let piece: String = chars[start..end].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }
        start = end;
    }
    pieces
}

/// Last `n` characters of a string, on char boundaries.
fn char_suffix(text: &str, n: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(n);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(target: usize, max: usize, min: usize, overlap: usize) -> ChunkPolicy {
        ChunkPolicy {
            target_size: target,
            max_size: max,
            min_size: min,
            overlap,
        }
    }

    #[test]
    fn test_short_section_single_chunk() {
        let chunks = chunk_section("doc.md::intro", "short text", &ChunkPolicy::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "doc.md::intro");
        assert_eq!(chunks[0].content, "short text");
    }

    #[test]
    fn test_long_section_splits_with_chunk_suffixes() {
        let paragraphs: Vec<String> = (0..10).map(|i| format!("paragraph {} {}", i, "x".repeat(80))).collect();
        let content = paragraphs.join("\n\n");
        let chunks = chunk_section("doc.md::s", &content, &policy(120, 200, 20, 10));

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].id, "doc.md::s");
        for (i, chunk) in chunks.iter().enumerate().skip(1) {
            assert_eq!(chunk.id, format!("doc.md::s-chunk-{}", i));
        }
    }

    #[test]
    fn test_overlap_prepended() {
        let paragraphs: Vec<String> = (0..6).map(|i| format!("para {} {}", i, "y".repeat(90))).collect();
        let content = paragraphs.join("\n\n");
        let overlap = 15;
        let chunks = chunk_section("d::s", &content, &policy(100, 150, 10, overlap));

        assert!(chunks.len() > 1);
        for i in 1..chunks.len() {
            // The chunk starts with the tail of the previous raw piece. The
            // previous *chunk* content itself ends with that same tail.
            let prev = &chunks[i - 1].content;
            let tail: String = {
                let cs: Vec<char> = prev.chars().collect();
                cs[cs.len().saturating_sub(overlap)..].iter().collect()
            };
            assert!(
                chunks[i].content.starts_with(&tail),
                "chunk {} missing overlap lead-in",
                i
            );
        }
    }

    #[test]
    fn test_conservation_modulo_overlap() {
        let paragraphs: Vec<String> = (0..8).map(|i| format!("block {} {}", i, "z".repeat(70))).collect();
        let content = paragraphs.join("\n\n");
        let overlap = 12;
        let chunks = chunk_section("d::s", &content, &policy(90, 140, 10, overlap));

        let mut rebuilt = chunks[0].content.clone();
        for chunk in chunks.iter().skip(1) {
            let body: String = {
                let cs: Vec<char> = chunk.content.chars().collect();
                cs[overlap.min(cs.len())..].iter().collect()
            };
            rebuilt.push_str("\n\n");
            rebuilt.push_str(&body);
        }
        assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_small_trailing_piece_merges_into_previous_chunk() {
        // Three paragraphs: two near target size, one tiny tail. The tiny
        // tail should fold into chunk 1, not stand alone.
        let content = format!(
            "{}\n\n{}\n\ntiny",
            "a".repeat(100),
            "b".repeat(100)
        );
        let chunks = chunk_section("d::s", &content, &policy(100, 150, 50, 10));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].content.ends_with("tiny"));
    }

    #[test]
    fn test_head_chunk_never_absorbs_follower() {
        // Two pieces where the second is small: the head keeps the plain
        // section id, so no merge happens and the small piece survives.
        let content = format!("{}\n\nsmall tail", "a".repeat(100));
        let chunks = chunk_section("d::s", &content, &policy(80, 110, 50, 10));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, "d::s");
        assert_eq!(chunks[1].id, "d::s-chunk-1");
        assert!(chunks[1].content.ends_with("small tail"));
    }

    #[test]
    fn test_hard_split_preserves_words_and_utf8() {
        let text = "héllo wörld ".repeat(40);
        let pieces = hard_split(&text, 50);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 50);
        }
    }
}
