use serde::{Deserialize, Serialize};

/// Represents the current state of an account in the vault.
///
/// An account moves between these states:
/// - `NotSetup` → `Unlocked` (after a seed is stored)
/// - `Unlocked` → `Locked` (explicit lock or inactivity timeout)
/// - `Locked` → `Unlocked` (after a successful unlock)
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AccountStatus {
    /// No record is stored for the account
    #[default]
    NotSetup,
    /// A record exists but no session is open
    Locked,
    /// A session is open and the seed is accessible
    Unlocked,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSetup => write!(f, "NotSetup"),
            Self::Locked => write!(f, "Locked"),
            Self::Unlocked => write!(f, "Unlocked"),
        }
    }
}
