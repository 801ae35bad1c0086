//! Splitting large drafts into ordered remote chunks.

use super::remote::{RemoteChunk, RemoteError};
use crate::hash::ContentHash;

/// Split `content` into slices of at most `max_bytes`, never cutting a
/// UTF-8 character. A single character wider than `max_bytes` gets a slice
/// of its own.
pub fn split_chunks(content: &str, max_bytes: usize) -> Vec<&str> {
    let max_bytes = max_bytes.max(1);
    let mut chunks = Vec::with_capacity(content.len() / max_bytes + 1);
    let mut rest = content;

    while !rest.is_empty() {
        let mut end = max_bytes.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(end);
        chunks.push(head);
        rest = tail;
    }
    chunks
}

pub fn build_chunks(content: &str, version: &ContentHash, max_bytes: usize) -> Vec<RemoteChunk> {
    let slices = split_chunks(content, max_bytes);
    let total = slices.len();
    slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| RemoteChunk {
            index,
            total,
            version: version.clone(),
            content: slice.to_string(),
        })
        .collect()
}

/// Concatenate the chunks of one version, checking that all `total` of them
/// are present exactly once.
pub fn reassemble(
    mut chunks: Vec<RemoteChunk>,
    total: usize,
    version: &ContentHash,
) -> Result<String, RemoteError> {
    chunks.sort_by_key(|chunk| chunk.index);
    chunks.dedup_by_key(|chunk| chunk.index);

    if chunks.len() != total {
        return Err(RemoteError::Fatal(format!(
            "expected {total} chunks of version {version}, found {}",
            chunks.len()
        )));
    }

    let mut content = String::new();
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.index != expected || chunk.total != total || &chunk.version != version {
            return Err(RemoteError::Fatal(format!(
                "chunk {} does not belong to version {version}",
                chunk.index
            )));
        }
        content.push_str(&chunk.content);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_content;
    use pretty_assertions::assert_eq;

    #[test]
    fn small_content_is_a_single_chunk() {
        assert_eq!(split_chunks("short", 16), vec!["short"]);
        assert!(split_chunks("", 16).is_empty());
    }

    #[test]
    fn splits_respect_char_boundaries() {
        // 'é' is two bytes, so a 3-byte limit can only ever hold one.
        let content = "éééé";
        let chunks = split_chunks(content, 3);
        assert_eq!(chunks, vec!["é", "é", "é", "é"]);

        let wide = "🦀🦀";
        assert_eq!(split_chunks(wide, 2), vec!["🦀", "🦀"]);
    }

    #[test]
    fn chunks_are_bounded_and_ordered() {
        let content = "Dear admissions committee, ".repeat(40);
        let version = hash_content(&content);
        let chunks = build_chunks(&content, &version, 100);

        assert!(chunks.iter().all(|chunk| chunk.content.len() <= 100));
        assert!(chunks.iter().all(|chunk| chunk.total == chunks.len()));
        assert_eq!(chunks.len(), content.len().div_ceil(100));

        let mut shuffled = chunks;
        shuffled.reverse();
        assert_eq!(reassemble(shuffled, content.len().div_ceil(100), &version).unwrap(), content);
    }

    #[test]
    fn missing_or_foreign_chunks_are_rejected() {
        let content = "abcdefghij";
        let version = hash_content(content);
        let mut chunks = build_chunks(content, &version, 4);

        let missing = reassemble(chunks[..2].to_vec(), 3, &version);
        assert!(matches!(missing, Err(RemoteError::Fatal(_))));

        chunks[1].version = hash_content("other");
        assert!(reassemble(chunks, 3, &version).is_err());
    }
}
