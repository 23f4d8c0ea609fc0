//! Password verifier stored next to the encrypted seed.
//!
//! The verifier is an Argon2 PHC string, so it carries its own algorithm,
//! cost parameters and salt. Checking a password re-derives the hash with
//! those stored parameters and compares the outputs in constant time.

use argon2::password_hash::{Output, PasswordHash, PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::kdf::{argon2_instance, dummy_derivation, generate_salt, note_derivation};
use crate::config::KdfConfig;
use crate::error::{VaultError, VaultResult};

/// Hash a password into a self-describing PHC string with a fresh salt.
pub fn hash_password(password: &str, kdf: &KdfConfig) -> VaultResult<String> {
    let salt = SaltString::encode_b64(&generate_salt())
        .map_err(|e| VaultError::Crypto(format!("Salt encoding failed: {}", e)))?;

    note_derivation();
    let hash = argon2_instance(kdf, None)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| VaultError::Crypto(format!("Password hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Check `password` against a stored PHC string.
///
/// A malformed or tampered hash is reported as `IncorrectPassword` after one
/// derivation at `fallback` cost, so it is rejected in the same time as a
/// wrong password.
pub fn verify_password(password: &str, stored: &str, fallback: &KdfConfig) -> VaultResult<()> {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(_) => return Err(malformed(password, fallback, "unparseable")),
    };
    let (hasher, expected) = match verifier_for(&parsed) {
        Ok(verifier) => verifier,
        Err(reason) => return Err(malformed(password, fallback, reason)),
    };
    let Some(salt) = parsed.salt else {
        return Err(malformed(password, fallback, "missing salt"));
    };

    note_derivation();
    let candidate = hasher
        .hash_password(password.as_bytes(), salt)
        .map_err(|_| VaultError::IncorrectPassword)?;
    let candidate = candidate.hash.ok_or(VaultError::IncorrectPassword)?;

    if bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(VaultError::IncorrectPassword)
    }
}

/// Rebuild the Argon2 instance a PHC string was produced with.
fn verifier_for(parsed: &PasswordHash<'_>) -> Result<(Argon2<'static>, Output), &'static str> {
    let expected = parsed.hash.ok_or("missing digest")?;

    let algorithm = Algorithm::try_from(parsed.algorithm).map_err(|_| "unknown algorithm")?;
    let version = match parsed.version {
        Some(v) => Version::try_from(v).map_err(|_| "unknown version")?,
        None => Version::V0x13,
    };
    let params = Params::try_from(parsed).map_err(|_| "invalid parameters")?;

    let stored_cost = KdfConfig {
        memory_kib: params.m_cost(),
        iterations: params.t_cost(),
        parallelism: params.p_cost(),
    };
    if !stored_cost.within_limits() {
        return Err("parameters out of range");
    }

    Ok((Argon2::new(algorithm, version, params), expected))
}

fn malformed(password: &str, fallback: &KdfConfig, reason: &str) -> VaultError {
    warn!("Stored password hash rejected: {}", reason);
    dummy_derivation(password, fallback);
    VaultError::IncorrectPassword
}
