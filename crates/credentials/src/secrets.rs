//! One-way secret hashing.
//!
//! The same primitive protects account passwords and the 6-digit OTP codes:
//! Argon2id with a random salt, stored as a PHC string. Verification goes
//! through the hash's own verifier, never through string comparison.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{CredentialError, CredentialResult};

// Argon2id cost parameters. ~100ms-class on commodity hardware, which is the
// point: OTP codes have only a million possible values, so each guess must
// be expensive.
const MEMORY_COST_KIB: u32 = 19_456; // 19 MiB
const TIME_COST: u32 = 2;
const PARALLELISM: u32 = 1;

fn hasher() -> CredentialResult<Argon2<'static>> {
    let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
        .map_err(|e| CredentialError::Hashing(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a secret with a fresh random salt, returning a PHC string.
pub fn hash_secret(secret: &str) -> CredentialResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = hasher()?
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| CredentialError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

/// Verify a secret against a stored PHC string.
///
/// A malformed stored hash verifies as false rather than erroring; callers
/// treat it the same as a wrong secret.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    let Ok(argon2) = hasher() else {
        return false;
    };
    argon2.verify_password(secret.as_bytes(), &parsed).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_password() {
        let hash = hash_secret("hunter2hunter2").unwrap();
        assert!(verify_secret("hunter2hunter2", &hash));
        assert!(!verify_secret("hunter2hunter3", &hash));
    }

    #[test]
    fn round_trips_an_otp() {
        let hash = hash_secret("042517").unwrap();
        assert!(verify_secret("042517", &hash));
        assert!(!verify_secret("042518", &hash));
    }

    #[test]
    fn salts_are_random() {
        let a = hash_secret("same-secret").unwrap();
        let b = hash_secret("same-secret").unwrap();
        assert_ne!(a, b);
        assert!(verify_secret("same-secret", &a));
        assert!(verify_secret("same-secret", &b));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_secret("anything", "not-a-phc-string"));
        assert!(!verify_secret("anything", ""));
    }
}
