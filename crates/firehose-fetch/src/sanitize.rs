/// Cleans up a subject-id found in the wild before using it in a lookup:
/// strips whitespace, collapses duplicate `:` separators, restores a missing
/// `did:` prefix, and trims trailing punctuation.
pub fn sanitize_subject(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned
        .split(':')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(":");
    let mut cleaned = if cleaned.starts_with("did:") {
        cleaned
    } else {
        format!("did:{cleaned}")
    };
    while cleaned.ends_with([':', ';', ',', '.', '_', '-']) {
        cleaned.pop();
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_whitespace_and_duplicate_colons() {
        assert_eq!(sanitize_subject("did::plc: :abc123"), "did:plc:abc123");
    }

    #[test]
    fn restores_missing_prefix() {
        assert_eq!(sanitize_subject("plc:abc123"), "did:plc:abc123");
    }

    #[test]
    fn trims_trailing_punctuation() {
        assert_eq!(sanitize_subject("did:plc:abc123."), "did:plc:abc123");
    }
}
