//! Mention extraction (§4.5.3): `@handle` tokens in post text, resolved
//! against locally-known users only — no outbound network lookup per
//! mention, since a handle that was never seen on this relay has no
//! subject row to notify anyway.

use regex::Regex;
use std::sync::OnceLock;

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"@[a-zA-Z0-9.-]+").expect("static pattern"))
}

/// Distinct `@handle` tokens found in `text`, handles stripped of the `@`.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for m in mention_pattern().find_iter(text) {
        let handle = m.as_str().trim_start_matches('@').to_string();
        if seen.insert(handle.clone()) {
            out.push(handle);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_distinct_mentions() {
        let mentions = extract_mentions("hey @alice.bsky.social and @bob.test, also @alice.bsky.social again");
        assert_eq!(mentions, vec!["alice.bsky.social".to_string(), "bob.test".to_string()]);
    }

    #[test]
    fn ignores_bare_at_sign() {
        assert!(extract_mentions("just an @ sign").is_empty());
    }
}
