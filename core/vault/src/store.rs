//! Vault store boundary trait.
//!
//! The backing store owns the vault collection, the single active-vault
//! slot, key derivation, and live-update listeners. Credential and sync
//! components only talk to it through this trait.

use async_trait::async_trait;
use std::sync::Arc;

use crate::model::{ActiveVault, Vault, VaultEncryption};
use tidevault_common::{Result, VaultId};
use tidevault_crypto::{DerivedKey, Salt};

/// Callback invoked on each live-update notification.
///
/// Notifications carry no payload; the consumer re-fetches.
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle to a registered update listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerHandle {
    pub vault_id: VaultId,
    pub token: String,
}

/// A vault as it appears in the store's collection listing, together with
/// its encryption record when the vault is protected.
#[derive(Debug, Clone, PartialEq)]
pub struct VaultListing {
    pub vault: Vault,
    pub encryption: Option<VaultEncryption>,
}

/// Backing store for vaults and their credentials.
///
/// The active-vault slot is a single mutable cell. Swap-then-restore
/// sequences on it are a critical section owned by the credential manager;
/// the store itself provides no locking.
#[async_trait]
pub trait VaultStore: Send + Sync {
    /// Get the currently active vault, if any.
    async fn active_vault(&self) -> Result<Option<ActiveVault>>;

    /// Replace the vault object in the active slot, preserving its
    /// encryption.
    async fn set_active_vault(&self, vault: Vault) -> Result<()>;

    /// Upsert a vault into the collection, preserving any stored
    /// encryption. Fires update listeners for that vault id.
    async fn put_vault(&self, vault: Vault) -> Result<()>;

    /// Store a new vault protected by `password`: generates a salt,
    /// derives the key, and encrypts the payload.
    async fn put_protected_vault(&self, vault: Vault, password: &str) -> Result<()>;

    /// Fetch a vault from the collection by id.
    async fn vault(&self, id: &VaultId) -> Result<Option<Vault>>;

    /// List all vaults with their encryption records.
    async fn list_vaults(&self) -> Result<Vec<VaultListing>>;

    /// Get the encryption record for a vault, if it is protected.
    async fn encryption_for(&self, id: &VaultId) -> Result<Option<VaultEncryption>>;

    /// Get the master-password encryption record, used as the restore
    /// snapshot when the active slot carries no encryption of its own.
    async fn master_encryption(&self) -> Result<VaultEncryption>;

    /// Derive a comparison/decryption key from a salt and password.
    async fn derive_key(&self, salt: &Salt, password: &str) -> Result<DerivedKey>;

    /// Swap the active slot to the given vault using the supplied
    /// credentials.
    ///
    /// # Postconditions
    /// - On success the vault is active under `credentials`
    /// - On failure the active slot is left untouched
    ///
    /// # Errors
    /// - Vault not found
    /// - Credentials do not decrypt the vault payload
    async fn init_active_with_credentials(
        &self,
        id: &VaultId,
        credentials: VaultEncryption,
    ) -> Result<()>;

    /// Rotate the password protecting a vault: new salt, re-derived key,
    /// re-encrypted payload. Replaces the stored encryption record and the
    /// active slot's, if that vault is active.
    async fn rotate_password(&self, vault: &Vault, new_password: &str) -> Result<()>;

    /// Register an update listener for a vault id.
    ///
    /// Registration replaces any prior listener for the same id; listeners
    /// never stack.
    async fn register_listener(
        &self,
        id: &VaultId,
        on_update: UpdateCallback,
    ) -> Result<ListenerHandle>;

    /// Remove a listener. A stale handle (already replaced) is a no-op.
    async fn remove_listener(&self, handle: &ListenerHandle) -> Result<()>;

    /// Check whether a vault is password-protected.
    async fn is_protected(&self, id: &VaultId) -> Result<bool>;
}
