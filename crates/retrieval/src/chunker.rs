use docent_domain::error::{Error, Result};

/// Split `text` into windows of `size` characters, each starting
/// `size - overlap` characters after the previous one.
///
/// Windowing stops once a window reaches the end of the text, so the last
/// window may be shorter than `size`. Empty input yields no windows.
/// Fails with [`Error::Config`] unless `overlap < size`.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    if overlap >= size {
        return Err(Error::Config(format!(
            "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
        )));
    }

    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap;
    let mut windows = Vec::with_capacity(chars.len() / step + 1);

    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_advance_by_size_minus_overlap() {
        let chunks = chunk_text("abcdefghij", 4, 1).unwrap();
        assert_eq!(chunks, vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk_text("", 800, 100).unwrap().is_empty());
    }

    #[test]
    fn short_input_is_a_single_window() {
        assert_eq!(chunk_text("hello", 800, 100).unwrap(), vec!["hello"]);
    }

    #[test]
    fn trailing_window_may_be_short() {
        assert_eq!(chunk_text("abcdefg", 4, 0).unwrap(), vec!["abcd", "efg"]);
    }

    #[test]
    fn invalid_overlap_is_a_config_error() {
        assert!(matches!(chunk_text("abc", 4, 4), Err(Error::Config(_))));
        assert!(matches!(chunk_text("abc", 0, 0), Err(Error::Config(_))));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunks = chunk_text("ééééé", 2, 0).unwrap();
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn stripping_overlap_reconstructs_the_text() {
        let text: String = (0..500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for (size, overlap) in [(7, 0), (7, 3), (50, 49), (64, 16), (1000, 10)] {
            let chunks = chunk_text(&text, size, overlap).unwrap();
            let mut rebuilt = String::new();
            let last = chunks.len() - 1;
            for (i, chunk) in chunks.iter().enumerate() {
                if i == last {
                    rebuilt.push_str(chunk);
                } else {
                    rebuilt.extend(chunk.chars().take(size - overlap));
                }
            }
            assert_eq!(rebuilt, text, "size={size} overlap={overlap}");
            assert!(chunks.iter().all(|c| c.chars().count() <= size));
        }
    }

    #[test]
    fn deterministic() {
        let text = "The quick brown fox jumps over the lazy dog.";
        assert_eq!(chunk_text(text, 10, 3).unwrap(), chunk_text(text, 10, 3).unwrap());
    }
}
