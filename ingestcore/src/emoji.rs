const MAX_EMOJI_CHARS: usize = 16;

/// Rough check that a reaction is a single emoji sequence rather than text.
pub fn is_emoji(candidate: &str) -> bool {
    if candidate.is_empty() || candidate.chars().count() > MAX_EMOJI_CHARS {
        return false;
    }
    if candidate.chars().any(char::is_whitespace) {
        return false;
    }
    // keycaps ("1\u{fe0f}\u{20e3}") are the only emoji that contain ASCII
    let has_keycap = candidate.contains('\u{20e3}');
    candidate
        .chars()
        .all(|c| !c.is_ascii() || (has_keycap && (c.is_ascii_digit() || c == '#' || c == '*')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_emoji_and_rejects_text() {
        assert!(is_emoji("👍"));
        assert!(is_emoji("👩‍👩‍👧"));
        assert!(is_emoji("1\u{fe0f}\u{20e3}"));
        assert!(!is_emoji(""));
        assert!(!is_emoji("ok"));
        assert!(!is_emoji("👍 👍"));
    }
}
