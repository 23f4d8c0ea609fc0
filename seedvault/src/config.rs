use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

/// Inactivity timeout after which an unlocked account is locked again.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Argon2id cost parameters shared by the password hash and the seed key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfConfig {
    /// Upper bounds accepted for stored parameters, checked before any derivation.
    pub const MAX_MEMORY_KIB: u32 = 256 * 1024;
    pub const MAX_ITERATIONS: u32 = 16;
    pub const MAX_PARALLELISM: u32 = 16;

    pub fn within_limits(&self) -> bool {
        self.memory_kib <= Self::MAX_MEMORY_KIB
            && self.iterations <= Self::MAX_ITERATIONS
            && self.parallelism <= Self::MAX_PARALLELISM
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 65536, // 64 MB
            iterations: 3,
            parallelism: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub lock_timeout_ms: u64,
    pub min_password_len: usize,
    pub kdf: KdfConfig,
    pub storage_timeout_ms: u64,
    /// Namespace prefix for keys in the backing store.
    pub key_prefix: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            min_password_len: 8,
            kdf: KdfConfig::default(),
            storage_timeout_ms: 5000,
            key_prefix: "zconsole".to_string(),
        }
    }
}

impl VaultConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_millis(self.storage_timeout_ms)
    }

    /// Reject settings the vault cannot run with.
    pub fn validate(&self) -> VaultResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(VaultError::Config("lock_timeout_ms must be positive".into()));
        }
        if self.storage_timeout_ms == 0 {
            return Err(VaultError::Config(
                "storage_timeout_ms must be positive".into(),
            ));
        }
        if self.min_password_len == 0 {
            return Err(VaultError::Config(
                "min_password_len must be at least 1".into(),
            ));
        }
        if self.key_prefix.trim().is_empty() {
            return Err(VaultError::Config("key_prefix cannot be empty".into()));
        }
        if !self.kdf.within_limits() {
            return Err(VaultError::Config(format!(
                "KDF cost exceeds limits (memory <= {} KiB, iterations <= {}, parallelism <= {})",
                KdfConfig::MAX_MEMORY_KIB,
                KdfConfig::MAX_ITERATIONS,
                KdfConfig::MAX_PARALLELISM
            )));
        }
        argon2::Params::new(
            self.kdf.memory_kib,
            self.kdf.iterations,
            self.kdf.parallelism,
            None,
        )
        .map_err(|e| VaultError::Config(format!("Invalid Argon2 params: {}", e)))?;
        Ok(())
    }
}

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> VaultResult<VaultConfig> {
    if !path.exists() {
        return Ok(VaultConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: VaultConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &VaultConfig) -> VaultResult<()> {
    config.validate()?;
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
