//! KeyVault - password-gated custody of seed phrases.
//!
//! This module provides the KeyVault struct that handles:
//! - Storing a seed phrase encrypted under a password (plus a password hash)
//! - Verifying passwords against the stored hash
//! - Unlocking accounts into in-memory sessions
//! - Locking sessions explicitly or after an inactivity timeout
//!
//! Every operation on an account holds that account's slot lock for its
//! whole duration, so unlocks, renewals, locks and timer expiry for one
//! account are serialized. Slots are only kept while a session may be open.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use super::session::{SessionSecrets, SharedSlot};
use super::status::AccountStatus;
use crate::config::VaultConfig;
use crate::crypto::{hash_password, open_seed, seal_seed, verify_password};
use crate::error::{VaultError, VaultResult};
use crate::mnemonic::validate_mnemonic;
use crate::storage::{AccountStorage, PASSWORD_HASH_FIELD, SEED_FIELD};

/// KeyVault guards the seed phrases of any number of accounts.
///
/// Records live in an [`AccountStorage`]; decrypted material only lives in
/// per-account sessions that lock after `config.lock_timeout()` without use.
pub struct KeyVault {
    storage: Arc<dyn AccountStorage>,
    config: VaultConfig,
    /// Session slots of accounts that were recently unlocked
    slots: Mutex<HashMap<String, SharedSlot>>,
}

impl KeyVault {
    /// Create a vault over `storage`.
    ///
    /// # Errors
    /// Returns `Config` if `config` fails validation.
    pub fn new(storage: Arc<dyn AccountStorage>, config: VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        Ok(Self {
            storage,
            config,
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// The validated configuration this vault runs with.
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    /// Store `seed` for `account` under `password`, replacing any existing
    /// record, and open a session for it.
    ///
    /// # Arguments
    /// * `account` - Non-empty account name
    /// * `seed` - BIP-39 English mnemonic, stored exactly as given
    /// * `password` - New password protecting the seed
    ///
    /// # Errors
    /// `InvalidSeedFormat` if the phrase fails BIP-39 validation,
    /// `WeakPassword` if the password is shorter than the configured minimum,
    /// `StorageFailure` if the record could not be written. On error the
    /// stored record and any open session are left as they were.
    pub async fn create_or_replace_seed(
        &self,
        account: &str,
        seed: &str,
        password: &str,
    ) -> VaultResult<()> {
        check_account_name(account)?;
        validate_mnemonic(seed)?;
        self.check_password_policy(password)?;

        let slot = self.slot(account).await;
        let result = async {
            let mut guard = slot.lock().await;

            let password_hash = hash_password(password, &self.config.kdf)?;
            let ciphertext = seal_seed(seed, password, account, &self.config.kdf)?;
            let secrets = SessionSecrets::from_phrase(Zeroizing::new(seed.to_string()))?;

            self.write_record(account, &ciphertext, &password_hash).await?;

            guard.open(&slot, account, secrets, self.config.lock_timeout());
            Ok::<_, VaultError>(())
        }
        .await;
        drop(slot);

        match &result {
            Ok(()) => info!("Stored seed for account '{}'", account),
            Err(_) => self.release_slot(account).await,
        }
        result
    }

    /// Whether a record exists for `account`. Reads storage only.
    ///
    /// # Errors
    /// `InvalidAccountName` for an empty name, `StorageFailure` if the store
    /// could not be read.
    pub async fn is_account_present(&self, account: &str) -> VaultResult<bool> {
        check_account_name(account)?;
        Ok(self.read_field(account, PASSWORD_HASH_FIELD).await?.is_some())
    }

    /// Verify `password` against the stored hash.
    ///
    /// Renews the inactivity timer if the account is unlocked. Never opens a
    /// session.
    ///
    /// # Errors
    /// `AccountNotFound` if nothing is stored, `IncorrectPassword` if the
    /// password does not match.
    pub async fn check_password(&self, account: &str, password: &str) -> VaultResult<()> {
        check_account_name(account)?;

        let slot = self.existing_slot(account).await;
        let mut guard = match slot.as_ref() {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };

        let password_hash = self
            .read_field(account, PASSWORD_HASH_FIELD)
            .await?
            .ok_or(VaultError::AccountNotFound)?;
        verify_password(password, &password_hash, &self.config.kdf)?;

        if let (Some(slot), Some(guard)) = (slot.as_ref(), guard.as_mut()) {
            if guard.renew(slot, account, self.config.lock_timeout()) {
                debug!("Password check renewed session for '{}'", account);
            }
        }
        Ok(())
    }

    /// Decrypt the stored seed and open a session, replacing any open one.
    ///
    /// # Errors
    /// `AccountNotFound` if nothing is stored, `IncorrectPassword` if the
    /// password is wrong or the stored record is damaged. On error any open
    /// session is left untouched.
    pub async fn unlock(&self, account: &str, password: &str) -> VaultResult<()> {
        self.open_session(account, password).await?;
        info!("Unlocked account '{}'", account);
        Ok(())
    }

    /// Unlock `account` and return its seed phrase as it was stored.
    ///
    /// # Errors
    /// Same as [`KeyVault::unlock`].
    pub async fn get_seed(&self, account: &str, password: &str) -> VaultResult<Zeroizing<String>> {
        let phrase = self.open_session(account, password).await?;
        info!("Seed phrase retrieved for account '{}'", account);
        Ok(phrase)
    }

    /// True unless a live session exists for `account`.
    pub async fn is_locked(&self, account: &str) -> bool {
        match self.existing_slot(account).await {
            Some(slot) => !slot.lock().await.is_open(),
            None => true,
        }
    }

    /// Gate for operations that need an unlocked account.
    ///
    /// # Errors
    /// `Unauthenticated` if no live session exists. On success the session
    /// deadline is pushed back by the lock timeout.
    pub async fn require_auth(&self, account: &str) -> VaultResult<()> {
        let slot = self
            .existing_slot(account)
            .await
            .ok_or(VaultError::Unauthenticated)?;
        let mut guard = slot.lock().await;

        if guard.renew(&slot, account, self.config.lock_timeout()) {
            Ok(())
        } else {
            Err(VaultError::Unauthenticated)
        }
    }

    /// Run `f` with the unlocked material of `account`, renewing the session.
    ///
    /// The slot lock is held while `f` runs, so keep it short.
    ///
    /// # Errors
    /// `Unauthenticated` if no live session exists.
    pub async fn with_secrets<F, R>(&self, account: &str, f: F) -> VaultResult<R>
    where
        F: FnOnce(&SessionSecrets) -> R,
    {
        let slot = self
            .existing_slot(account)
            .await
            .ok_or(VaultError::Unauthenticated)?;
        let mut guard = slot.lock().await;

        if !guard.renew(&slot, account, self.config.lock_timeout()) {
            return Err(VaultError::Unauthenticated);
        }
        let secrets = guard.secrets().ok_or(VaultError::Unauthenticated)?;
        Ok(f(secrets))
    }

    /// Wipe the session of `account` and cancel its timer. Idempotent.
    pub async fn lock_now(&self, account: &str) {
        let Some(slot) = self.existing_slot(account).await else {
            return;
        };
        let was_open = slot.lock().await.lock();
        drop(slot);

        self.release_slot(account).await;
        if was_open {
            info!("Locked account '{}'", account);
        }
    }

    /// Lock every open session, e.g. before the process exits.
    pub async fn lock_all(&self) {
        let accounts: Vec<String> = self.slots.lock().await.keys().cloned().collect();
        for account in accounts {
            self.lock_now(&account).await;
        }
    }

    /// Combined view of storage and session state for `account`.
    ///
    /// # Errors
    /// `InvalidAccountName` for an empty name, `StorageFailure` if the store
    /// could not be read.
    pub async fn status(&self, account: &str) -> VaultResult<AccountStatus> {
        if !self.is_locked(account).await {
            return Ok(AccountStatus::Unlocked);
        }
        if self.is_account_present(account).await? {
            Ok(AccountStatus::Locked)
        } else {
            Ok(AccountStatus::NotSetup)
        }
    }

    /// Delete the stored record of `account` and wipe its session.
    ///
    /// The session is only dropped once storage confirms the removal.
    /// Removing an unknown account succeeds.
    ///
    /// # Errors
    /// `InvalidAccountName` for an empty name, `StorageFailure` if the store
    /// could not be updated.
    pub async fn remove_account(&self, account: &str) -> VaultResult<()> {
        check_account_name(account)?;

        if let Some(slot) = self.existing_slot(account).await {
            let mut guard = slot.lock().await;
            self.remove_record(account).await?;
            guard.lock();
        } else {
            self.remove_record(account).await?;
        }

        self.release_slot(account).await;
        info!("Removed account '{}'", account);
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn check_password_policy(&self, password: &str) -> VaultResult<()> {
        if password.chars().count() < self.config.min_password_len {
            return Err(VaultError::WeakPassword {
                min_len: self.config.min_password_len,
            });
        }
        Ok(())
    }

    /// Authenticate under the slot lock and open a session.
    ///
    /// Returns a copy of the stored phrase. On failure the slot is released
    /// if it holds no session.
    async fn open_session(&self, account: &str, password: &str) -> VaultResult<Zeroizing<String>> {
        check_account_name(account)?;

        let slot = self.slot(account).await;
        let result = async {
            let mut guard = slot.lock().await;
            let secrets = self.authenticate(account, password).await?;
            let phrase = Zeroizing::new(secrets.phrase().to_string());
            guard.open(&slot, account, secrets, self.config.lock_timeout());
            Ok::<_, VaultError>(phrase)
        }
        .await;
        drop(slot);

        if result.is_err() {
            self.release_slot(account).await;
        }
        result
    }

    /// Verify the password and decrypt the stored seed.
    ///
    /// Once a password hash exists, both checks always run at full cost, so
    /// a damaged or incomplete record takes as long to reject as a wrong
    /// password, and both yield `IncorrectPassword`.
    async fn authenticate(&self, account: &str, password: &str) -> VaultResult<SessionSecrets> {
        let password_hash = self
            .read_field(account, PASSWORD_HASH_FIELD)
            .await?
            .ok_or(VaultError::AccountNotFound)?;
        let ciphertext = self.read_field(account, SEED_FIELD).await?;
        if ciphertext.is_none() {
            warn!("Account '{}' has a password hash but no seed", account);
        }

        let verified = verify_password(password, &password_hash, &self.config.kdf);
        let opened = open_seed(
            ciphertext.as_deref().unwrap_or_default(),
            password,
            account,
            &self.config.kdf,
        );

        match (verified, opened) {
            (Ok(()), Ok(phrase)) => SessionSecrets::from_phrase(phrase).map_err(|_| {
                warn!("Decrypted seed for '{}' is not a valid mnemonic", account);
                VaultError::IncorrectPassword
            }),
            _ => Err(VaultError::IncorrectPassword),
        }
    }

    async fn read_field(&self, account: &str, field: &str) -> VaultResult<Option<String>> {
        tokio::time::timeout(self.config.storage_timeout(), self.storage.get(account, field))
            .await
            .map_err(|_| VaultError::StorageFailure(format!("Timed out reading '{}'", field)))?
    }

    async fn write_record(
        &self,
        account: &str,
        ciphertext: &str,
        password_hash: &str,
    ) -> VaultResult<()> {
        let fields = [(SEED_FIELD, ciphertext), (PASSWORD_HASH_FIELD, password_hash)];
        tokio::time::timeout(self.config.storage_timeout(), self.storage.set(account, &fields))
            .await
            .map_err(|_| VaultError::StorageFailure("Timed out writing record".into()))??;
        debug!("Wrote vault record for '{}'", account);
        Ok(())
    }

    async fn remove_record(&self, account: &str) -> VaultResult<()> {
        tokio::time::timeout(self.config.storage_timeout(), self.storage.remove(account))
            .await
            .map_err(|_| VaultError::StorageFailure("Timed out removing account".into()))?
    }

    async fn slot(&self, account: &str) -> SharedSlot {
        let mut slots = self.slots.lock().await;
        slots.entry(account.to_string()).or_default().clone()
    }

    async fn existing_slot(&self, account: &str) -> Option<SharedSlot> {
        self.slots.lock().await.get(account).cloned()
    }

    /// Forget the slot of `account` if it has no session and nobody else
    /// holds it.
    ///
    /// Handles are only cloned under the map lock, so a strong count of one
    /// means the map holds the last reference.
    async fn release_slot(&self, account: &str) {
        let mut slots = self.slots.lock().await;
        let idle = slots.get(account).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().is_ok_and(|mut guard| !guard.is_open())
        });
        if idle {
            slots.remove(account);
        }
    }
}

fn check_account_name(account: &str) -> VaultResult<()> {
    if account.trim().is_empty() {
        return Err(VaultError::InvalidAccountName);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derivations, test_kdf};
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;
    use data_encoding::BASE64;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
    const OTHER_PHRASE: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";
    const TIMEOUT: Duration = Duration::from_secs(60);

    fn test_config() -> VaultConfig {
        VaultConfig {
            lock_timeout_ms: TIMEOUT.as_millis() as u64,
            min_password_len: 4,
            kdf: test_kdf(),
            ..VaultConfig::default()
        }
    }

    fn vault_with(storage: Arc<MemoryStorage>) -> KeyVault {
        KeyVault::new(storage, test_config()).unwrap()
    }

    fn vault() -> (KeyVault, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (vault_with(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let (vault, _) = vault();

        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        assert!(vault.is_account_present("alice").await.unwrap());

        assert!(matches!(
            vault.unlock("alice", "wrong-pw").await,
            Err(VaultError::IncorrectPassword)
        ));
        vault.unlock("alice", "correct-horse").await.unwrap();

        let seed = vault.get_seed("alice", "correct-horse").await.unwrap();
        assert_eq!(seed.as_str(), PHRASE);
    }

    #[tokio::test]
    async fn test_round_trip_after_lock() {
        let (vault, _) = vault();
        let messy = format!("  {}\n", PHRASE.to_uppercase());

        vault
            .create_or_replace_seed("alice", &messy, "correct-horse")
            .await
            .unwrap();
        vault.lock_now("alice").await;
        vault.unlock("alice", "correct-horse").await.unwrap();

        // Returned exactly as given, not normalized
        let phrase = vault
            .with_secrets("alice", |s| s.phrase().to_string())
            .await
            .unwrap();
        assert_eq!(phrase, messy);
    }

    #[tokio::test]
    async fn test_wrong_password_leaves_session_untouched() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        assert!(!vault.is_locked("alice").await);

        assert!(matches!(
            vault.unlock("alice", "wrong-pw").await,
            Err(VaultError::IncorrectPassword)
        ));
        assert!(!vault.is_locked("alice").await);

        vault.lock_now("alice").await;
        assert!(vault.get_seed("alice", "wrong-pw").await.is_err());
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_create_validates_inputs() {
        let (vault, storage) = vault();

        assert!(matches!(
            vault
                .create_or_replace_seed("alice", "not a mnemonic", "correct-horse")
                .await,
            Err(VaultError::InvalidSeedFormat)
        ));
        assert!(matches!(
            vault.create_or_replace_seed("alice", PHRASE, "abc").await,
            Err(VaultError::WeakPassword { min_len: 4 })
        ));
        assert!(matches!(
            vault.create_or_replace_seed("  ", PHRASE, "correct-horse").await,
            Err(VaultError::InvalidAccountName)
        ));

        assert!(storage.is_empty().await);
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_check_password() {
        let (vault, _) = vault();
        assert!(matches!(
            vault.check_password("alice", "correct-horse").await,
            Err(VaultError::AccountNotFound)
        ));

        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault.check_password("alice", "correct-horse").await.unwrap();
        assert!(matches!(
            vault.check_password("alice", "wrong-pw").await,
            Err(VaultError::IncorrectPassword)
        ));
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (vault, _) = vault();
        assert!(matches!(
            vault.unlock("nobody", "correct-horse").await,
            Err(VaultError::AccountNotFound)
        ));
        assert!(matches!(
            vault.require_auth("nobody").await,
            Err(VaultError::Unauthenticated)
        ));
        assert_eq!(
            vault.status("nobody").await.unwrap(),
            AccountStatus::NotSetup
        );
    }

    #[tokio::test]
    async fn test_lock_now_is_idempotent() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        vault.lock_now("alice").await;
        assert!(vault.is_locked("alice").await);
        vault.lock_now("alice").await;
        assert!(vault.is_locked("alice").await);
        vault.lock_now("never-seen").await;

        assert!(matches!(
            vault.require_auth("alice").await,
            Err(VaultError::Unauthenticated)
        ));
        assert!(matches!(
            vault.with_secrets("alice", |s| s.seed().len()).await,
            Err(VaultError::Unauthenticated)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_times_out() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault.lock_now("alice").await;

        vault.unlock("alice", "correct-horse").await.unwrap();
        assert!(!vault.is_locked("alice").await);

        tokio::time::advance(TIMEOUT + Duration::from_millis(1)).await;
        assert!(vault.is_locked("alice").await);
        assert_eq!(vault.status("alice").await.unwrap(), AccountStatus::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_require_auth_slides_deadline() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        let epsilon = Duration::from_secs(1);
        tokio::time::advance(TIMEOUT - epsilon).await;
        vault.require_auth("alice").await.unwrap();

        tokio::time::advance(epsilon * 2).await;
        assert!(!vault.is_locked("alice").await);

        // The renewed deadline still applies
        tokio::time::advance(TIMEOUT).await;
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_password_and_secrets_access_renew() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        let epsilon = Duration::from_secs(1);
        tokio::time::advance(TIMEOUT - epsilon).await;
        vault.check_password("alice", "correct-horse").await.unwrap();
        tokio::time::advance(TIMEOUT - epsilon).await;
        let seed_len = vault
            .with_secrets("alice", |s| s.seed().len())
            .await
            .unwrap();
        assert_eq!(seed_len, 64);

        tokio::time::advance(TIMEOUT - epsilon * 2).await;
        assert!(!vault.is_locked("alice").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_password_check_does_not_renew() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        tokio::time::advance(TIMEOUT - Duration::from_secs(1)).await;
        assert!(vault.check_password("alice", "wrong-pw").await.is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_incorrect_password() {
        let (vault, storage) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault.lock_now("alice").await;

        let blob = storage.get("alice", SEED_FIELD).await.unwrap().unwrap();
        let mut raw = BASE64.decode(blob.as_bytes()).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(&raw);
        storage
            .set("alice", &[(SEED_FIELD, tampered.as_str())])
            .await
            .unwrap();

        assert!(matches!(
            vault.unlock("alice", "correct-horse").await,
            Err(VaultError::IncorrectPassword)
        ));
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_presence_check_has_no_side_effects() {
        let (vault, storage) = vault();

        for _ in 0..3 {
            assert!(!vault.is_account_present("alice").await.unwrap());
        }
        assert!(storage.is_empty().await);

        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault.lock_now("alice").await;
        let before = storage.get("alice", PASSWORD_HASH_FIELD).await.unwrap();

        for _ in 0..3 {
            assert!(vault.is_account_present("alice").await.unwrap());
        }
        assert_eq!(storage.len().await, 2);
        assert_eq!(
            storage.get("alice", PASSWORD_HASH_FIELD).await.unwrap(),
            before
        );
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_rekeying_replaces_both_fields() {
        let (vault, storage) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        let old_blob = storage.get("alice", SEED_FIELD).await.unwrap();
        let old_hash = storage.get("alice", PASSWORD_HASH_FIELD).await.unwrap();

        vault
            .create_or_replace_seed("alice", OTHER_PHRASE, "battery-staple")
            .await
            .unwrap();
        assert_ne!(storage.get("alice", SEED_FIELD).await.unwrap(), old_blob);
        assert_ne!(
            storage.get("alice", PASSWORD_HASH_FIELD).await.unwrap(),
            old_hash
        );

        // The open session now holds the new seed
        let phrase = vault
            .with_secrets("alice", |s| s.phrase().to_string())
            .await
            .unwrap();
        assert_eq!(phrase, OTHER_PHRASE);

        vault.lock_now("alice").await;
        assert!(matches!(
            vault.unlock("alice", "correct-horse").await,
            Err(VaultError::IncorrectPassword)
        ));
        let seed = vault.get_seed("alice", "battery-staple").await.unwrap();
        assert_eq!(seed.as_str(), OTHER_PHRASE);
    }

    #[tokio::test]
    async fn test_accounts_are_independent() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault
            .create_or_replace_seed("bob", OTHER_PHRASE, "battery-staple")
            .await
            .unwrap();

        vault.lock_now("alice").await;
        assert!(vault.is_locked("alice").await);
        assert!(!vault.is_locked("bob").await);

        assert!(matches!(
            vault.unlock("alice", "battery-staple").await,
            Err(VaultError::IncorrectPassword)
        ));

        vault.lock_all().await;
        assert!(vault.is_locked("bob").await);
    }

    #[tokio::test]
    async fn test_remove_account() {
        let (vault, storage) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        vault.remove_account("alice").await.unwrap();
        assert!(storage.is_empty().await);
        assert!(vault.is_locked("alice").await);
        assert_eq!(vault.status("alice").await.unwrap(), AccountStatus::NotSetup);

        vault.remove_account("alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_slots_are_not_kept_for_misses_or_removed_accounts() {
        let (vault, _) = vault();

        for i in 0..50 {
            let ghost = format!("ghost-{}", i);
            assert!(vault.check_password(&ghost, "correct-horse").await.is_err());
            assert!(vault.unlock(&ghost, "correct-horse").await.is_err());
            assert!(vault.get_seed(&ghost, "correct-horse").await.is_err());
        }
        assert_eq!(vault.slots.lock().await.len(), 0);

        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        assert!(vault.unlock("alice", "wrong-pw").await.is_err());
        assert_eq!(vault.slots.lock().await.len(), 1);

        vault.lock_now("alice").await;
        assert_eq!(vault.slots.lock().await.len(), 0);

        vault.unlock("alice", "correct-horse").await.unwrap();
        vault.remove_account("alice").await.unwrap();
        assert_eq!(vault.slots.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn test_rejections_cost_two_derivations() {
        let (vault, storage) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        vault.lock_now("alice").await;
        let hash = storage.get("alice", PASSWORD_HASH_FIELD).await.unwrap().unwrap();
        let blob = storage.get("alice", SEED_FIELD).await.unwrap().unwrap();

        let cases: [(&str, &str, &str, Option<&str>); 5] = [
            ("wrong password", "wrong-pw", &hash, Some(&blob)),
            ("garbage seed", "correct-horse", &hash, Some("AAAA")),
            ("missing seed", "correct-horse", &hash, None),
            ("garbage hash", "correct-horse", "not-a-phc-string", Some(&blob)),
            ("both damaged", "correct-horse", "$argon2id$", Some("")),
        ];

        for (label, password, stored_hash, stored_seed) in cases {
            storage.remove("alice").await.unwrap();
            let mut fields = vec![(PASSWORD_HASH_FIELD, stored_hash)];
            if let Some(seed) = stored_seed {
                fields.push((SEED_FIELD, seed));
            }
            storage.set("alice", &fields).await.unwrap();

            let before = derivations();
            assert!(
                matches!(
                    vault.unlock("alice", password).await,
                    Err(VaultError::IncorrectPassword)
                ),
                "{}",
                label
            );
            assert_eq!(derivations() - before, 2, "{}", label);
        }
    }

    #[tokio::test]
    async fn test_concurrent_unlocks_leave_one_session() {
        let (vault, _) = vault();
        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();
        let vault = Arc::new(vault);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let vault = vault.clone();
            handles.push(tokio::spawn(async move {
                vault.unlock("alice", "correct-horse").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        vault.lock_now("alice").await;
        assert!(vault.is_locked("alice").await);
    }

    #[tokio::test]
    async fn test_file_backed_vault_survives_restart() {
        use crate::storage::FileStorage;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.json");

        {
            let storage = FileStorage::open(&path, "zconsole").await.unwrap();
            let vault = KeyVault::new(Arc::new(storage), test_config()).unwrap();
            vault
                .create_or_replace_seed("alice", PHRASE, "correct-horse")
                .await
                .unwrap();
        }

        let storage = FileStorage::open(&path, "zconsole").await.unwrap();
        let vault = KeyVault::new(Arc::new(storage), test_config()).unwrap();
        assert_eq!(vault.status("alice").await.unwrap(), AccountStatus::Locked);

        let seed = vault.get_seed("alice", "correct-horse").await.unwrap();
        assert_eq!(seed.as_str(), PHRASE);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("zconsole.alice.pwHash"));
        assert!(!raw.contains("abandon"));
    }

    /// Store whose writes can be switched off.
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_writes: AtomicBool,
    }

    #[async_trait]
    impl AccountStorage for FlakyStorage {
        async fn get(&self, account: &str, field: &str) -> VaultResult<Option<String>> {
            self.inner.get(account, field).await
        }

        async fn set(&self, account: &str, fields: &[(&str, &str)]) -> VaultResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(VaultError::StorageFailure("disk full".into()));
            }
            self.inner.set(account, fields).await
        }

        async fn remove(&self, account: &str) -> VaultResult<()> {
            self.inner.remove(account).await
        }
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_previous_state() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            fail_writes: AtomicBool::new(false),
        });
        let vault = KeyVault::new(storage.clone(), test_config()).unwrap();

        vault
            .create_or_replace_seed("alice", PHRASE, "correct-horse")
            .await
            .unwrap();

        storage.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            vault
                .create_or_replace_seed("alice", OTHER_PHRASE, "battery-staple")
                .await,
            Err(VaultError::StorageFailure(_))
        ));

        // Old session and old record both survive
        let phrase = vault
            .with_secrets("alice", |s| s.phrase().to_string())
            .await
            .unwrap();
        assert_eq!(phrase, PHRASE);
        vault.lock_now("alice").await;
        vault.unlock("alice", "correct-horse").await.unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = VaultConfig {
            lock_timeout_ms: 0,
            ..test_config()
        };
        assert!(KeyVault::new(Arc::new(MemoryStorage::new()), config).is_err());

        let (vault, _) = vault();
        assert_eq!(vault.config().lock_timeout(), TIMEOUT);
        assert_eq!(vault.config().min_password_len, 4);
    }
}
