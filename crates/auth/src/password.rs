//! Password hashing.
//!
//! Thin wrapper over bcrypt so that hashing policy (cost, error mapping)
//! lives in one place. Verification is constant-time inside bcrypt itself.

use notificator_core::{Error, Result};

/// Hashes a plaintext password with the given cost.
pub fn hash(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost)
        .map_err(|err| Error::internal(format!("bcrypt hash failed: {err}")))
}

/// Verifies a plaintext password against a stored hash.
pub fn verify(password: &str, stored_hash: &str) -> Result<bool> {
    bcrypt::verify(password, stored_hash)
        .map_err(|err| Error::internal(format!("bcrypt verify failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    // MIN_COST keeps the test fast; production cost comes from config.
    const COST: u32 = 4;

    #[test]
    fn roundtrip() {
        let hashed = hash("pw1234", COST).unwrap();
        assert!(verify("pw1234", &hashed).unwrap());
        assert!(!verify("pw1235", &hashed).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let one = hash("pw1234", COST).unwrap();
        let two = hash("pw1234", COST).unwrap();
        assert_ne!(one, two);
    }
}
