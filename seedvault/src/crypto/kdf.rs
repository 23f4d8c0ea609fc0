use aes_gcm::aead::{rand_core::RngCore, OsRng};
use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::KdfConfig;
use crate::error::{VaultError, VaultResult};

/// Salt size in bytes (128 bits)
pub const SALT_SIZE: usize = 16;

/// 256-bit key for AES-256
pub const KEY_SIZE: usize = 32;

/// A 256-bit encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SeedKey {
    key: [u8; KEY_SIZE],
}

impl SeedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for SeedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
thread_local! {
    static DERIVATIONS: std::cell::Cell<usize> = const { std::cell::Cell::new(0) };
}

/// Record one Argon2 evaluation. Only counted in test builds.
pub(crate) fn note_derivation() {
    #[cfg(test)]
    DERIVATIONS.with(|count| count.set(count.get() + 1));
}

/// Argon2 evaluations performed on the current thread so far.
#[cfg(test)]
pub(crate) fn derivations() -> usize {
    DERIVATIONS.with(|count| count.get())
}

/// Argon2id instance for the given cost parameters.
pub fn argon2_instance(kdf: &KdfConfig, output_len: Option<usize>) -> VaultResult<Argon2<'static>> {
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, output_len)
        .map_err(|e| VaultError::Crypto(format!("Invalid Argon2 params: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Derive the seed encryption key from a password.
///
/// Deliberately slow; cost is set by `kdf`.
pub fn derive_key(password: &str, salt: &[u8; SALT_SIZE], kdf: &KdfConfig) -> VaultResult<SeedKey> {
    let argon2 = argon2_instance(kdf, Some(KEY_SIZE))?;

    let mut key = SeedKey {
        key: [0u8; KEY_SIZE],
    };
    note_derivation();
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key.key)
        .map_err(|e| VaultError::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(key)
}

/// Spend one derivation at `kdf` cost and discard the result.
///
/// Rejection paths that never reach the real derivation call this so they
/// cost the same as a wrong password.
pub fn dummy_derivation(password: &str, kdf: &KdfConfig) {
    let _ = derive_key(password, &[0u8; SALT_SIZE], kdf);
}
