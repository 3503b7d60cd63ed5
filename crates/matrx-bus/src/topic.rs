//! Topic exchange binding-key matching.
//!
//! Keys are dot-separated words. In a binding key `*` matches exactly one
//! word and `#` matches zero or more words.

/// Check whether a routing key matches a topic binding key.
#[must_use]
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = routing_key.split('.').collect();
    matches_words(&pattern, &words)
}

fn matches_words(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|skip| matches_words(rest, &words[skip..])),
        Some((&"*", rest)) => !words.is_empty() && matches_words(rest, &words[1..]),
        Some((word, rest)) => words.first() == Some(word) && matches_words(rest, &words[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_keys() {
        assert!(topic_matches("renderer_requests", "renderer_requests"));
        assert!(!topic_matches("renderer_requests", "renderer_request"));
        assert!(topic_matches("dev-1", "dev-1"));
        assert!(!topic_matches("dev-1", "dev-10"));
    }

    #[test]
    fn test_literal_keys_with_dots() {
        assert!(topic_matches("site.a.dev", "site.a.dev"));
        assert!(!topic_matches("site.a.dev", "site.a"));
        assert!(!topic_matches("site.a", "site.a.dev"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("device.*", "device.dev-1"));
        assert!(!topic_matches("device.*", "device"));
        assert!(!topic_matches("device.*", "device.a.b"));
    }

    #[test]
    fn test_hash_matches_any_words() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("device.#", "device"));
        assert!(topic_matches("device.#", "device.a.b"));
        assert!(topic_matches("#.dev-1", "site.dev-1"));
        assert!(!topic_matches("#.dev-1", "site.dev-2"));
    }
}
