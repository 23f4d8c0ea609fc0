//! Persistent key-value store behind the vault.
//!
//! The vault keeps exactly two opaque strings per account: the encrypted
//! seed blob and the password hash. Both are always written in a single
//! `set` call, which implementations must apply all-or-nothing.

mod file;
mod memory;

use async_trait::async_trait;

use crate::error::VaultResult;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Field holding the encrypted seed blob.
pub const SEED_FIELD: &str = "seed";

/// Field holding the Argon2 PHC password hash.
pub const PASSWORD_HASH_FIELD: &str = "pwHash";

/// String store keyed by `(account, field)`.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    async fn get(&self, account: &str, field: &str) -> VaultResult<Option<String>>;

    /// Write every `(field, value)` pair for `account`, or none of them.
    async fn set(&self, account: &str, fields: &[(&str, &str)]) -> VaultResult<()>;

    /// Delete every field stored for `account`. Succeeds if nothing is stored.
    async fn remove(&self, account: &str) -> VaultResult<()>;
}
