//! `@username` mention extraction.
//!
//! Mentions are resolved against the user table when a comment is committed.
//! Unresolved tokens stay verbatim in the content and are not an error.

/// Extracts candidate usernames from `@name` tokens, in order of first
/// appearance, without duplicates. A token starts after `@` at the beginning
/// of the text or after a non-word character, and runs over ASCII
/// alphanumerics, `_`, `-` and `.`.
pub fn extract(content: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let bytes = content.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'@' {
            let preceded_ok = index == 0 || !is_name_byte(bytes[index - 1]);
            let start = index + 1;
            let mut end = start;
            while end < bytes.len() && is_name_byte(bytes[end]) {
                end += 1;
            }
            if preceded_ok && end > start {
                let name = &content[start..end];
                if !found.iter().any(|seen| seen == name) {
                    found.push(name.to_string());
                }
            }
            index = end.max(index + 1);
        } else {
            index += 1;
        }
    }
    found
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_simple_mentions() {
        assert_eq!(extract("ping @alice please"), vec!["alice"]);
        assert_eq!(extract("@alice @bob"), vec!["alice", "bob"]);
    }

    #[test]
    fn deduplicates_preserving_order() {
        assert_eq!(extract("@bob then @alice then @bob"), vec!["bob", "alice"]);
    }

    #[test]
    fn ignores_emails_and_bare_at() {
        assert_eq!(extract("mail alice@example.com"), Vec::<String>::new());
        assert_eq!(extract("just an @ sign"), Vec::<String>::new());
    }

    #[test]
    fn accepts_name_punctuation() {
        assert_eq!(extract("cc @ops-oncall.primary"), vec!["ops-oncall.primary"]);
    }
}
