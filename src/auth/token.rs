//! Token hashing and secret generation
//!
//! Only the SHA-256 hex digest of a secret is ever persisted or compared;
//! the raw secret is returned to the caller exactly once, at creation.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of generated token secrets in hex characters
const TOKEN_SECRET_HEX_LEN: usize = 32;

/// Return the SHA-256 hex digest for `secret`
pub fn hash_token(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Generate a new random token secret (32 hex characters)
pub fn generate_token_secret() -> String {
    let mut bytes = [0u8; TOKEN_SECRET_HEX_LEN / 2];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable_sha256_hex() {
        let hash = hash_token("my-secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("my-secret"));
        // Known digest of the empty string
        assert_eq!(
            hash_token(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hash_never_contains_secret() {
        let secret = "super-secret-value";
        let hash = hash_token(secret);
        assert!(!hash.contains(secret));
        assert_ne!(hash, secret);
    }

    #[test]
    fn test_generated_secrets() {
        let first = generate_token_secret();
        let second = generate_token_secret();

        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }
}
