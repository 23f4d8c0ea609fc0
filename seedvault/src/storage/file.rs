//! JSON file store.
//!
//! All entries live in one document keyed `<prefix>.<account>.<field>`.
//! Every write replaces the whole file through a synced temp file and
//! `rename`, followed by a sync of the directory, so a multi-field `set` is
//! either fully on disk or not at all.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::AccountStorage;
use crate::error::{VaultError, VaultResult};

pub struct FileStorage {
    path: PathBuf,
    prefix: String,
    /// Mirror of the file contents; also serializes writers.
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the store at `path`, loading existing entries if the file exists.
    pub async fn open(path: impl Into<PathBuf>, prefix: impl Into<String>) -> VaultResult<Self> {
        let path = path.into();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                VaultError::StorageFailure(format!("Store file is corrupted: {}", e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(VaultError::StorageFailure(format!(
                    "Failed to read store file: {}",
                    e
                )))
            }
        };

        Ok(Self {
            path,
            prefix: prefix.into(),
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key(&self, account: &str, field: &str) -> String {
        format!("{}.{}.{}", self.prefix, account, field)
    }

    fn belongs_to(&self, key: &str, account: &str) -> bool {
        let account_prefix = format!("{}.{}.", self.prefix, account);
        // Field names never contain dots, so `a` does not claim `a.b`'s keys
        key.strip_prefix(&account_prefix)
            .is_some_and(|field| !field.contains('.'))
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> VaultResult<()> {
        let content = serde_json::to_vec_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&temp_path)
            .await
            .map_err(|e| VaultError::StorageFailure(format!("Failed to create store: {}", e)))?;

        // A temp file left over from a crash keeps its old mode, so set it again
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms)
                .await
                .map_err(|e| {
                    VaultError::StorageFailure(format!("Failed to set permissions: {}", e))
                })?;
        }

        file.write_all(&content)
            .await
            .map_err(|e| VaultError::StorageFailure(format!("Failed to write store: {}", e)))?;
        // Contents must be on disk before the rename can expose them
        file.sync_all()
            .await
            .map_err(|e| VaultError::StorageFailure(format!("Failed to sync store: {}", e)))?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| VaultError::StorageFailure(format!("Failed to replace store: {}", e)))?;

        #[cfg(unix)]
        self.sync_parent_dir().await?;

        debug!("Persisted {} store entries to {:?}", entries.len(), self.path);
        Ok(())
    }

    /// Flush the directory entry so the rename itself survives a crash.
    #[cfg(unix)]
    async fn sync_parent_dir(&self) -> VaultResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let handle = tokio::fs::File::open(dir).await.map_err(|e| {
            VaultError::StorageFailure(format!("Failed to open store directory: {}", e))
        })?;
        handle.sync_all().await.map_err(|e| {
            VaultError::StorageFailure(format!("Failed to sync store directory: {}", e))
        })
    }
}

#[async_trait]
impl AccountStorage for FileStorage {
    async fn get(&self, account: &str, field: &str) -> VaultResult<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&self.key(account, field)).cloned())
    }

    async fn set(&self, account: &str, fields: &[(&str, &str)]) -> VaultResult<()> {
        let mut entries = self.entries.lock().await;

        let mut updated = entries.clone();
        for (field, value) in fields {
            updated.insert(self.key(account, field), value.to_string());
        }

        // Memory mirror only changes once the file has been replaced
        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }

    async fn remove(&self, account: &str) -> VaultResult<()> {
        let mut entries = self.entries.lock().await;

        let mut updated = entries.clone();
        updated.retain(|key, _| !self.belongs_to(key, account));
        if updated.len() == entries.len() {
            return Ok(());
        }

        self.persist(&updated).await?;
        *entries = updated;
        Ok(())
    }
}
