//! In-memory unlocked sessions and their inactivity timers.
//!
//! Each account owns one [`AccountSlot`] behind an async mutex. The expiry
//! task for a session holds a `Weak` handle to that slot and the generation
//! it was armed for; renewing a session bumps the generation and re-arms
//! the timer under the same lock, so a stale timer can never clear a
//! renewed session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::VaultResult;
use crate::mnemonic::{derive_seed, SEED_SIZE};

pub(crate) type SharedSlot = Arc<Mutex<AccountSlot>>;

/// Decrypted material of an unlocked account.
///
/// Both fields are wiped when the value is dropped.
pub struct SessionSecrets {
    phrase: Zeroizing<String>,
    seed: Zeroizing<[u8; SEED_SIZE]>,
}

impl SessionSecrets {
    /// Build the session material from a phrase, deriving the BIP-39 seed.
    pub(crate) fn from_phrase(phrase: Zeroizing<String>) -> VaultResult<Self> {
        let seed = derive_seed(&phrase)?;
        Ok(Self { phrase, seed })
    }

    /// The mnemonic exactly as it was stored.
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// 64-byte BIP-39 seed, the root for downstream key derivation.
    pub fn seed(&self) -> &[u8; SEED_SIZE] {
        &self.seed
    }
}

impl std::fmt::Debug for SessionSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSecrets")
            .field("phrase", &"[REDACTED]")
            .field("seed", &"[REDACTED]")
            .finish()
    }
}

struct UnlockedSession {
    secrets: SessionSecrets,
    deadline: Instant,
    generation: u64,
    timer: AbortHandle,
}

impl Drop for UnlockedSession {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Session state for one account.
#[derive(Default)]
pub(crate) struct AccountSlot {
    session: Option<UnlockedSession>,
    generation: u64,
}

impl AccountSlot {
    /// Open a session, replacing (and wiping) any previous one.
    pub fn open(
        &mut self,
        handle: &SharedSlot,
        account: &str,
        secrets: SessionSecrets,
        timeout: Duration,
    ) {
        self.generation += 1;
        let deadline = Instant::now() + timeout;
        let timer = spawn_expiry(handle, account, self.generation, deadline);

        self.session = Some(UnlockedSession {
            secrets,
            deadline,
            generation: self.generation,
            timer,
        });
    }

    /// Push the deadline of a live session to `now + timeout`.
    ///
    /// Returns `false` if no live session exists.
    pub fn renew(&mut self, handle: &SharedSlot, account: &str, timeout: Duration) -> bool {
        self.purge_expired();
        let Some(session) = self.session.as_mut() else {
            return false;
        };

        self.generation += 1;
        session.timer.abort();
        session.deadline = Instant::now() + timeout;
        session.generation = self.generation;
        session.timer = spawn_expiry(handle, account, self.generation, session.deadline);
        true
    }

    pub fn is_open(&mut self) -> bool {
        self.purge_expired();
        self.session.is_some()
    }

    pub fn secrets(&mut self) -> Option<&SessionSecrets> {
        self.purge_expired();
        self.session.as_ref().map(|session| &session.secrets)
    }

    /// Drop the session. Returns whether one was open.
    pub fn lock(&mut self) -> bool {
        self.session.take().is_some()
    }

    /// Timer callback: clear the session only if it is still the one the
    /// timer was armed for and its deadline has passed.
    fn expire(&mut self, generation: u64) -> bool {
        let due = self
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation && s.deadline <= Instant::now());
        if due {
            self.session = None;
        }
        due
    }

    fn purge_expired(&mut self) {
        let expired = self
            .session
            .as_ref()
            .is_some_and(|s| s.deadline <= Instant::now());
        if expired {
            debug!("Dropping session past its deadline");
            self.session = None;
        }
    }
}

fn spawn_expiry(handle: &SharedSlot, account: &str, generation: u64, deadline: Instant) -> AbortHandle {
    let slot = Arc::downgrade(handle);
    let account = account.to_string();

    tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;

        // The vault may have been dropped in the meantime
        let Some(slot) = slot.upgrade() else {
            return;
        };
        let mut guard = slot.lock().await;
        if guard.expire(generation) {
            info!("Account '{}' locked after inactivity", account);
        }
    })
    .abort_handle()
}
