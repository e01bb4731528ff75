//! Password hashing and complexity validation
//!
//! [`PasswordHasher`] is the boundary with the hashing primitive: the rest
//! of the controller only ever calls `hash` and `verify`. The shipped
//! implementation is a salted SHA-256 digest; deployments wanting a memory-
//! hard KDF implement the trait and hand it to the daemon.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Minimum password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// Salt length in bytes
const SALT_LENGTH: usize = 16;

/// Hashing primitive boundary
pub trait PasswordHasher: Send + Sync {
    /// Hash a secret into a storable digest
    fn hash(&self, secret: &str) -> String;

    /// Verify a secret against a stored digest
    fn verify(&self, secret: &str, digest: &str) -> bool;
}

/// Salted SHA-256 hasher, digest form `salt_hex$digest_hex`
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl Sha256Hasher {
    fn digest(secret: &str, salt: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl PasswordHasher for Sha256Hasher {
    fn hash(&self, secret: &str) -> String {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        format!("{}${}", hex::encode(salt), Self::digest(secret, &salt))
    }

    fn verify(&self, secret: &str, digest: &str) -> bool {
        let Some((salt_hex, expected)) = digest.split_once('$') else {
            return false;
        };
        let Ok(salt) = hex::decode(salt_hex) else {
            return false;
        };
        constant_time_eq(Self::digest(secret, &salt).as_bytes(), expected.as_bytes())
    }
}

/// Constant-time byte comparison to prevent timing attacks
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validate password complexity, returning every unmet requirement
///
/// Requirements: minimum length, one uppercase, one lowercase, one digit,
/// one non-alphanumeric character.
#[must_use]
pub fn validate_complexity(password: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if password.len() < MIN_PASSWORD_LENGTH {
        errors.push(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters long"
        ));
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push("password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push("password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        errors.push("password must contain at least one digit".to_string());
    }
    if !password.chars().any(|c| !c.is_ascii_alphanumeric()) {
        errors.push("password must contain at least one special character".to_string());
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hasher = Sha256Hasher;
        let digest = hasher.hash("Correct-Horse-1");
        assert!(hasher.verify("Correct-Horse-1", &digest));
        assert!(!hasher.verify("wrong-password", &digest));
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = Sha256Hasher;
        let a = hasher.hash("Correct-Horse-1");
        let b = hasher.hash("Correct-Horse-1");
        assert_ne!(a, b);
        assert!(hasher.verify("Correct-Horse-1", &a));
        assert!(hasher.verify("Correct-Horse-1", &b));
    }

    #[test]
    fn malformed_digest_never_verifies() {
        let hasher = Sha256Hasher;
        assert!(!hasher.verify("anything", "no-dollar-sign"));
        assert!(!hasher.verify("anything", "zzzz$deadbeef"));
    }

    #[test]
    fn complexity_rules() {
        assert!(validate_complexity("Str0ng-pass").is_empty());
        assert!(!validate_complexity("short").is_empty());
        assert!(!validate_complexity("alllowercase1!").is_empty());
        assert!(!validate_complexity("ALLUPPERCASE1!").is_empty());
        assert!(!validate_complexity("NoDigitsHere!").is_empty());
        assert!(!validate_complexity("NoSpecial123").is_empty());
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
    }
}
