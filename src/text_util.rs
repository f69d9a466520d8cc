/// Maximum number of characters in a preview before truncation.
pub const DEFAULT_PREVIEW_MAX_CHARS: usize = 240;

/// Collapse runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A single-line preview of `text`, at most `max_chars` characters plus an
/// ellipsis.
///
/// Truncation happens on a character boundary, preferring the last word
/// boundary when one is close enough.
pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = collapse_whitespace(text);
    if flat.chars().count() <= max_chars {
        return flat;
    }

    let cut = flat
        .char_indices()
        .nth(max_chars)
        .map_or(flat.len(), |(i, _)| i);
    let head = &flat[..cut];
    let head = match head.rfind(' ') {
        Some(space) if space >= cut / 2 => &head[..space],
        _ => head,
    };
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_whitespace_flattens_lines() {
        assert_eq!(collapse_whitespace("a\n\n  b\tc "), "a b c");
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(preview("hello world", 40), "hello world");
    }

    #[test]
    fn long_text_breaks_on_word() {
        assert_eq!(
            preview("credit report dispute process", 16),
            "credit report..."
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééééééééé";
        assert_eq!(preview(text, 4), "éééé...");
    }

    #[test]
    fn empty_text() {
        assert_eq!(preview("", 10), "");
    }
}
