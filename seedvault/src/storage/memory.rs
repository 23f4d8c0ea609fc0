use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::AccountStorage;
use crate::error::VaultResult;

/// In-process store. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AccountStorage for MemoryStorage {
    async fn get(&self, account: &str, field: &str) -> VaultResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(account.to_string(), field.to_string()))
            .cloned())
    }

    async fn set(&self, account: &str, fields: &[(&str, &str)]) -> VaultResult<()> {
        // A single write guard makes the batch atomic for readers
        let mut entries = self.entries.write().await;
        for (field, value) in fields {
            entries.insert((account.to_string(), field.to_string()), value.to_string());
        }
        Ok(())
    }

    async fn remove(&self, account: &str) -> VaultResult<()> {
        let mut entries = self.entries.write().await;
        entries.retain(|(name, _), _| name != account);
        Ok(())
    }
}
