//! Session token generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Bytes of entropy per session token.
const TOKEN_BYTES: usize = 32;

/// Generates a fresh bearer token: 32 bytes from the operating system's
/// CSPRNG, hex-encoded. Tokens are unguessable handles, not signed
/// assertions.
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_64_hex_chars() {
        let token = generate();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn tokens_do_not_repeat() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate()));
        }
    }
}
