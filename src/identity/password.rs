//! One-way credential hashing.
//! Argon2id in PHC string format: the salt and cost parameters travel inside
//! the hash, so verification needs no side storage. Both functions are
//! CPU-bound on purpose; async callers run them on a blocking thread.

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};

use crate::error::{AppError, AppResult};

/// Hash a plaintext password with a fresh random salt.
/// Fails only on catastrophic internal error; never on input content.
pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("salt", e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("salt_encode", e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash", e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Verify a plaintext password against a stored PHC hash.
/// Returns false for a mismatch or an unparseable hash; never errors.
/// The digest comparison inside argon2 is constant-time.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_verifies() {
        let phc = hash_password("secret1").unwrap();
        assert!(phc.starts_with("$argon2"));
        assert!(verify_password(&phc, "secret1"));
    }

    #[test]
    fn wrong_password_rejected() {
        let phc = hash_password("secret1").unwrap();
        assert!(!verify_password(&phc, "secret2"));
        assert!(!verify_password(&phc, ""));
    }

    #[test]
    fn same_password_hashes_differently() {
        // Fresh salt per call; equal inputs must not produce equal hashes.
        let a = hash_password("secret1").unwrap();
        let b = hash_password("secret1").unwrap();
        assert_ne!(a, b);
        assert!(verify_password(&b, "secret1"));
    }

    #[test]
    fn garbage_hash_is_a_mismatch_not_an_error() {
        assert!(!verify_password("not-a-phc-string", "secret1"));
        assert!(!verify_password("", "secret1"));
    }
}
