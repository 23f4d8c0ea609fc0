//! Local key vault for wallet seed phrases.
//!
//! A [`KeyVault`] keeps a BIP-39 mnemonic encrypted at rest behind a
//! password, verifies passwords against a stored Argon2 hash and holds the
//! decrypted seed in memory only while the account is in use.

pub mod config;
pub mod crypto;
pub mod error;
pub mod mnemonic;
pub mod storage;
pub mod vault;

pub use config::{load_config, save_config, KdfConfig, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use mnemonic::generate_mnemonic;
pub use storage::{AccountStorage, FileStorage, MemoryStorage};
pub use vault::{AccountStatus, KeyVault, SessionSecrets};
