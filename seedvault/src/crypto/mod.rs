pub mod cipher;
pub mod kdf;
pub mod password;

pub use cipher::{open_seed, seal_seed};
pub use kdf::{derive_key, dummy_derivation, SeedKey};

#[cfg(test)]
pub(crate) use kdf::derivations;
pub use password::{hash_password, verify_password};

/// Cheap Argon2 cost so tests stay fast.
#[cfg(test)]
pub(crate) fn test_kdf() -> crate::config::KdfConfig {
    crate::config::KdfConfig {
        memory_kib: 64,
        iterations: 1,
        parallelism: 1,
    }
}
