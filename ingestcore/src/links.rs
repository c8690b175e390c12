//! Link preview URL rules. Previews are only kept when their URL is a
//! plain https link that also appears in the message body.

pub fn is_valid_preview_url(url: &str) -> bool {
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();

    if host.is_empty() || !host.contains('.') || !host.is_ascii() {
        return false;
    }
    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    host.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Every valid preview URL found in `body`, in order of appearance.
pub fn find_valid_urls(body: &str) -> Vec<&str> {
    body.split_whitespace()
        .map(|token| token.trim_end_matches(['.', ',', ')', '!', '?']))
        .filter(|token| is_valid_preview_url(token))
        .collect()
}

pub fn body_contains_url(body: Option<&str>, url: &str) -> bool {
    body.is_some_and(|b| find_valid_urls(b).contains(&url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https_and_ip_hosts() {
        assert!(is_valid_preview_url("https://signal.org/blog"));
        assert!(!is_valid_preview_url("http://signal.org"));
        assert!(!is_valid_preview_url("https://127.0.0.1/x"));
        assert!(!is_valid_preview_url("https://localhost"));
        assert!(!is_valid_preview_url("https://xn--sgnal.org\u{430}"));
    }

    #[test]
    fn finds_urls_in_body() {
        let body = "see https://example.com/a, and http://other.com";
        assert_eq!(find_valid_urls(body), vec!["https://example.com/a"]);
        assert!(body_contains_url(Some(body), "https://example.com/a"));
        assert!(!body_contains_url(None, "https://example.com/a"));
    }
}
