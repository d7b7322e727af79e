//! Password credentials for local accounts.
//!
//! Hashes are Argon2id PHC strings with a random per-hash salt. Minimum length
//! and other strength rules belong to the caller; the only input refused here
//! is the empty string.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("password must not be empty")]
    WeakInput,
    #[error("password hashing failed: {0}")]
    Hash(String),
}

const GENERATED_PASSWORD_LEN: usize = 32;

/// Hash verified against when the account lookup missed, so an unknown email
/// costs the same as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("trailwatch-dummy").ok());

pub fn hash_password(plaintext: &str) -> Result<String, CredentialError> {
    if plaintext.is_empty() {
        return Err(CredentialError::WeakInput);
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| CredentialError::Hash(e.to_string()))
}

/// Constant-time check of `plaintext` against a stored PHC string. An empty or
/// unparseable stored hash never matches.
pub fn verify_password(stored_hash: &str, plaintext: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// Burns one verification for a login whose account does not exist.
pub fn verify_against_dummy(plaintext: &str) {
    if let Some(hash) = DUMMY_HASH.as_deref() {
        let _ = verify_password(hash, plaintext);
    }
}

/// Random credential for accounts created through federated login. Drawn from
/// the OS CSPRNG; the user never sees it.
pub fn generate_password() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_is_refused() {
        assert!(matches!(hash_password(""), Err(CredentialError::WeakInput)));
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!verify_password("", "anything"));
        assert!(!verify_password("not-a-phc-string", "anything"));
    }

    #[test]
    fn generated_passwords_differ() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), GENERATED_PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
