//! Unicode-safe text utilities for progress and log output.

/// Truncate `text` to at most `max_chars` Unicode scalar values,
/// appending `suffix` if truncation occurred.
///
/// Uses `char_indices().nth(max_chars)`; `str::floor_char_boundary` is not
/// available on the workspace MSRV.
pub fn truncate_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            let mut result = text[..byte_idx].to_string();
            result.push_str(suffix);
            result
        }
        None => text.to_string(),
    }
}

/// First non-empty line of `text`, trimmed. Empty input yields `""`.
pub fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_ascii_exact() {
        assert_eq!(truncate_chars("hello", 5, "..."), "hello");
    }

    #[test]
    fn truncate_chars_ascii_truncates() {
        assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
    }

    #[test]
    fn truncate_chars_zero_max() {
        assert_eq!(truncate_chars("hello", 0, "..."), "...");
    }

    #[test]
    fn truncate_chars_cjk_boundary() {
        assert_eq!(truncate_chars("中文测试", 2, ""), "中文");
    }

    #[test]
    fn truncate_chars_emoji_boundary() {
        assert_eq!(truncate_chars("🦀🦀🦀", 2, "..."), "🦀🦀...");
    }

    #[test]
    fn first_line_skips_blank_lines() {
        assert_eq!(first_line("\n\n  cargo test --all \nsecond"), "cargo test --all");
        assert_eq!(first_line(""), "");
        assert_eq!(first_line("   \n  "), "");
    }
}
