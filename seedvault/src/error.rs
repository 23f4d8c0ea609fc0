//! Vault error types.
//!
//! Every failure is returned to the immediate caller. Messages are safe to
//! show to a user: they never carry passwords, phrases or key bytes.

use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// No record is stored under the given account name.
    #[error("Account not found")]
    AccountNotFound,

    /// Account names must contain at least one non-whitespace character.
    #[error("Account name cannot be empty")]
    InvalidAccountName,

    /// The seed phrase is not a checksum-valid BIP-39 mnemonic.
    #[error("Invalid seed phrase")]
    InvalidSeedFormat,

    /// The password does not meet the configured policy.
    #[error("Password is too weak: at least {min_len} characters required")]
    WeakPassword { min_len: usize },

    /// Password verification or decryption failed.
    ///
    /// A corrupted or tampered record produces this same error.
    #[error("Incorrect password")]
    IncorrectPassword,

    /// The account is locked and requires a password.
    #[error("Account is locked. Unlock the account first")]
    Unauthenticated,

    /// The persistent store failed or timed out.
    #[error("Storage failure: {0}")]
    StorageFailure(String),

    /// Cipher or key-derivation setup failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The configuration file is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred (file access, permissions, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VaultError {
    /// Stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::AccountNotFound => "ACCOUNT_NOT_FOUND",
            VaultError::InvalidAccountName => "INVALID_ACCOUNT_NAME",
            VaultError::InvalidSeedFormat => "INVALID_SEED_FORMAT",
            VaultError::WeakPassword { .. } => "WEAK_PASSWORD",
            VaultError::IncorrectPassword => "INCORRECT_PASSWORD",
            VaultError::Unauthenticated => "UNAUTHENTICATED",
            VaultError::StorageFailure(_) => "STORAGE_FAILURE",
            VaultError::Crypto(_) => "CRYPTO_ERROR",
            VaultError::Config(_) => "CONFIG_ERROR",
            VaultError::Io(_) => "IO_ERROR",
            VaultError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result type alias for vault operations.
pub type VaultResult<T> = std::result::Result<T, VaultError>;

// ============================================================================
// Serialization for front ends
// ============================================================================

impl serde::Serialize for VaultError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("VaultError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
