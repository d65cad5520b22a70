//! Fixed-size text chunking.

/// Split text into fixed-length chunks of `chunk_size` characters with no
/// overlap. Splits are counted in characters, never bytes, so multi-byte
/// text stays valid. A `chunk_size` of 0 disables splitting.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    if chunk_size == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0;

    for ch in text.chars() {
        current.push(ch);
        count += 1;
        if count == chunk_size {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello world", 1024);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn long_text_splits_at_boundary() {
        let text = "a".repeat(2500);
        let chunks = chunk_text(&text, 1024);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1024);
        assert_eq!(chunks[1].len(), 1024);
        assert_eq!(chunks[2].len(), 452);
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        let text = "b".repeat(2048);
        let chunks = chunk_text(&text, 1024);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 1024));
    }

    #[test]
    fn splits_count_characters_not_bytes() {
        let text = "ü".repeat(10);
        let chunks = chunk_text(&text, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].chars().count(), 4);
        assert_eq!(chunks[2].chars().count(), 2);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("", 1024).is_empty());
    }

    #[test]
    fn zero_chunk_size_disables_splitting() {
        let chunks = chunk_text("some text", 0);
        assert_eq!(chunks, vec!["some text"]);
    }
}
