//! Credential management for protected vaults.
//!
//! Owns authentication, password rotation, and the most delicate operation
//! in the client: updating a protected vault that is not currently active.
//! That path swaps the active-vault slot to the target vault, performs the
//! risky update, and restores the previously active vault afterwards. The
//! restore obligations are kept on an explicit undo stack so that mutations
//! to the active slot are undone in reverse order of their introduction.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{ActiveVault, Vault, VaultEncryption, VAULT_VERSION};
use crate::store::VaultStore;
use tidevault_common::{Error, Result, VaultId};

/// Parameters for [`VaultCredentialManager::update_protected_vault`].
#[derive(Debug, Clone)]
pub struct UpdateProtectedVault {
    /// The updated vault object. Its id selects the target vault.
    pub vault: Vault,
    /// Password currently protecting the target vault.
    pub current_password: String,
    /// New password, when the update is a rotation. `None` or empty means
    /// the vault object itself is being updated.
    pub new_password: Option<String>,
}

/// A snapshot of the active slot, sufficient to restore it.
#[derive(Debug, Clone)]
struct RestorePoint {
    vault_id: VaultId,
    encryption: VaultEncryption,
}

/// Stack of restore obligations for the active-vault slot.
///
/// Pushed before each risky mutation, unwound in reverse order on failure
/// or at the end of an inactive-vault update.
struct UndoStack {
    store: Arc<dyn VaultStore>,
    restores: Vec<RestorePoint>,
}

impl UndoStack {
    fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            restores: Vec::new(),
        }
    }

    fn push(&mut self, point: RestorePoint) {
        self.restores.push(point);
    }

    /// Unwind, propagating the first restore failure.
    async fn unwind(&mut self) -> Result<()> {
        while let Some(point) = self.restores.pop() {
            self.store
                .init_active_with_credentials(&point.vault_id, point.encryption)
                .await?;
        }
        Ok(())
    }

    /// Unwind while an original error is being re-raised: restore failures
    /// are logged, never surfaced, so the original error keeps precedence.
    async fn unwind_best_effort(&mut self) {
        while let Some(point) = self.restores.pop() {
            if let Err(err) = self
                .store
                .init_active_with_credentials(&point.vault_id, point.encryption)
                .await
            {
                warn!(
                    vault_id = %point.vault_id,
                    "failed to restore active vault during rollback: {}", err
                );
            }
        }
    }
}

/// Manages authentication and password rotation for protected vaults.
///
/// Credential updates are serialized through an internal lock: the backing
/// store provides no locking of its own, and a second update racing a
/// swap-then-restore sequence would break the rollback invariant.
pub struct VaultCredentialManager {
    store: Arc<dyn VaultStore>,
    update_lock: Mutex<()>,
}

impl VaultCredentialManager {
    /// Create a manager over the given store.
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            update_lock: Mutex::new(()),
        }
    }

    /// Authenticate against a protected vault.
    ///
    /// Derives a comparison key from the vault's salt and compares it to
    /// the stored key in constant time.
    ///
    /// # Errors
    /// - `NotFound` if the vault has no encryption record
    /// - `InvalidPassword` on mismatch
    pub async fn authenticate(&self, vault_id: &VaultId, password: &str) -> Result<()> {
        let encryption = self
            .store
            .encryption_for(vault_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No encryption for vault {}", vault_id)))?;

        let derived = self.store.derive_key(&encryption.salt, password).await?;

        if !derived.ct_eq(&encryption.hashed_password) {
            return Err(Error::InvalidPassword);
        }
        Ok(())
    }

    /// Create a new vault, protected when a non-empty password is given.
    pub async fn create_vault(&self, name: &str, password: Option<&str>) -> Result<Vault> {
        if name.is_empty() {
            return Err(Error::InvalidInput("Vault name is required".to_string()));
        }

        let now = chrono::Utc::now();
        let vault = Vault {
            id: VaultId::new(Uuid::new_v4().to_string())?,
            name: name.to_string(),
            version: VAULT_VERSION,
            records: Vec::new(),
            devices: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        match password.filter(|p| !p.is_empty()) {
            Some(password) => {
                self.store
                    .put_protected_vault(vault.clone(), password)
                    .await?
            }
            None => self.store.put_vault(vault.clone()).await?,
        }

        Ok(vault)
    }

    /// Update a protected vault: its object, its password, or both targets
    /// resolved by whether the vault is currently active.
    ///
    /// Atomic from the caller's perspective: either fully applied, or the
    /// active slot is rolled back to its pre-call state and the original
    /// error is surfaced.
    ///
    /// # Errors
    /// - `Busy` if another credential update is in flight
    /// - `InvalidPassword` if `current_password` does not match
    /// - Store failures from the primary path, never swallowed
    pub async fn update_protected_vault(&self, update: UpdateProtectedVault) -> Result<()> {
        let _guard = self
            .update_lock
            .try_lock()
            .map_err(|_| Error::Busy("credential update already in progress".to_string()))?;

        let active = self.store.active_vault().await?;

        match active {
            Some(ref current) if current.vault.id == update.vault.id => {
                self.update_active(current, update).await
            }
            _ => self.update_inactive(active, update).await,
        }
    }

    /// Active-vault path: verify against the active slot's own credentials,
    /// then rotate or persist in place.
    async fn update_active(&self, active: &ActiveVault, update: UpdateProtectedVault) -> Result<()> {
        let encryption = active.encryption.as_ref().ok_or_else(|| {
            Error::NotFound(format!("No encryption for vault {}", active.vault.id))
        })?;

        let derived = self
            .store
            .derive_key(&encryption.salt, &update.current_password)
            .await?;

        if !derived.ct_eq(&encryption.hashed_password) {
            return Err(Error::InvalidPassword);
        }

        if let Some(new_password) = non_empty(&update.new_password) {
            return self.store.rotate_password(&update.vault, new_password).await;
        }

        self.store.set_active_vault(update.vault.clone()).await?;
        self.store.put_vault(update.vault).await
    }

    /// Inactive-vault path: swap the active slot to the target vault under
    /// freshly derived credentials, apply the update, and always hand the
    /// slot back to the previously active vault.
    ///
    /// A derived-key match is not trusted up front; the swap itself is the
    /// authority on whether the credentials are valid.
    async fn update_inactive(
        &self,
        active: Option<ActiveVault>,
        update: UpdateProtectedVault,
    ) -> Result<()> {
        let listings = self.store.list_vaults().await?;
        let target = listings
            .into_iter()
            .find(|l| l.vault.id == update.vault.id)
            .and_then(|l| l.encryption)
            .ok_or_else(|| {
                Error::NotFound(format!("No encryption for vault {}", update.vault.id))
            })?;

        let derived = self
            .store
            .derive_key(&target.salt, &update.current_password)
            .await?;

        let mut undo = UndoStack::new(self.store.clone());
        if let Some(previous) = &active {
            let encryption = match &previous.encryption {
                Some(encryption) => encryption.clone(),
                None => self.store.master_encryption().await?,
            };
            undo.push(RestorePoint {
                vault_id: previous.vault.id.clone(),
                encryption,
            });
        } else {
            debug!("no active vault before swap; nothing to restore");
        }

        let credentials = VaultEncryption {
            ciphertext: target.ciphertext,
            nonce: target.nonce,
            salt: target.salt,
            hashed_password: derived,
        };

        if let Err(err) = self
            .store
            .init_active_with_credentials(&update.vault.id, credentials)
            .await
        {
            undo.unwind_best_effort().await;
            return Err(err);
        }

        let outcome = self.apply_update(update).await;

        match outcome {
            // Primary path succeeded: a restore failure here is a real
            // store error and must surface.
            Ok(()) => undo.unwind().await,
            Err(err) => {
                undo.unwind_best_effort().await;
                Err(err)
            }
        }
    }

    /// The update phase, run while the target vault holds the active slot.
    async fn apply_update(&self, update: UpdateProtectedVault) -> Result<()> {
        if let Some(new_password) = non_empty(&update.new_password) {
            return self.store.rotate_password(&update.vault, new_password).await;
        }
        self.store.set_active_vault(update.vault.clone()).await?;
        self.store.put_vault(update.vault).await
    }
}

fn non_empty(password: &Option<String>) -> Option<&str> {
    password.as_deref().filter(|p| !p.is_empty())
}
