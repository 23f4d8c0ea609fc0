//! Password-gated seed custody with inactivity auto-lock.
//!
//! Each account persists two strings: the seed phrase encrypted with
//! AES-256-GCM under an Argon2id-derived key, and an Argon2id PHC hash of
//! the password. Decrypted material lives only in in-memory sessions that
//! lock themselves after a sliding inactivity timeout.

pub mod manager;
mod session;
pub mod status;

pub use manager::KeyVault;
pub use session::SessionSecrets;
pub use status::AccountStatus;
