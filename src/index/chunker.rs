use sha2::{Digest, Sha256};

use crate::config::PerformanceConfig;
use crate::retrieval::TextNode;

/// Split page nodes into overlapping chunk nodes.
///
/// Chunks inherit the page metadata and exclusion lists. Ids are derived from
/// the source node id and chunk ordinal, so rebuilding the same content
/// yields the same ids.
pub fn split_nodes(pages: Vec<TextNode>, config: &PerformanceConfig) -> Vec<TextNode> {
    let mut chunks = Vec::new();

    for page in pages {
        for (ordinal, text) in split_text(&page.text, config.chunk_size_tokens, config.chunk_overlap_tokens)
            .into_iter()
            .enumerate()
        {
            chunks.push(TextNode {
                id: chunk_id(&page.id, ordinal),
                text,
                metadata: page.metadata.clone(),
                excluded_embed_metadata_keys: page.excluded_embed_metadata_keys.clone(),
                excluded_llm_metadata_keys: page.excluded_llm_metadata_keys.clone(),
            });
        }
    }

    chunks
}

fn chunk_id(source_id: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b":");
    hasher.update(ordinal.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Largest char boundary at or before `pos`.
fn floor_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    (0..=pos).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

/// Character-window chunking, about 4 chars per token.
///
/// Each window ends at the last whitespace or sentence mark in its final fifth
/// when there is one; the next window starts `overlap_tokens` before that end.
pub fn split_text(text: &str, size_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let char_size = size_tokens.max(1) * 4;
    let char_overlap = overlap_tokens * 4;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = floor_boundary(text, start + char_size);

        let chunk_end = if end < text.len() {
            let search_start = floor_boundary(text, end.saturating_sub(char_size / 5)).max(start);
            text[search_start..end]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                .map(|(offset, c)| search_start + offset + c.len_utf8())
                .filter(|&boundary| boundary > start)
                .unwrap_or(end)
        } else {
            end
        };

        // A window narrower than one char still has to advance.
        let chunk_end = if chunk_end <= start {
            text[start..].chars().next().map(|c| start + c.len_utf8()).unwrap_or(text.len())
        } else {
            chunk_end
        };

        let chunk = text[start..chunk_end].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        if chunk_end >= text.len() {
            break;
        }

        let next = floor_boundary(text, chunk_end.saturating_sub(char_overlap));
        start = if next > start { next } else { chunk_end };
    }

    chunks
}
