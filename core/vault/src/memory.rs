//! In-memory vault store for testing and development.
//!
//! Unlike a bare fixture, this store performs real key derivation and
//! payload encryption, so credential failures surface the same way they do
//! against a production backend: a wrong password produces a key that fails
//! to decrypt the vault payload.

use async_trait::async_trait;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::model::{ActiveVault, Vault, VaultEncryption};
use crate::store::{ListenerHandle, UpdateCallback, VaultListing, VaultStore};
use tidevault_common::{Error, Result, VaultId};
use tidevault_crypto::{self as crypto, DerivedKey, KdfParams, Salt};

struct StoredVault {
    vault: Vault,
    encryption: Option<VaultEncryption>,
}

struct Listener {
    token: String,
    on_update: UpdateCallback,
}

struct Inner {
    vaults: HashMap<VaultId, StoredVault>,
    active: Option<ActiveVault>,
    master: VaultEncryption,
}

/// In-memory vault store.
///
/// All data is stored in memory and lost on drop.
pub struct MemoryVaultStore {
    inner: Arc<Mutex<Inner>>,
    listeners: Arc<Mutex<HashMap<VaultId, Listener>>>,
    kdf_params: KdfParams,
}

impl MemoryVaultStore {
    /// Create a store whose master encryption is derived from
    /// `master_password`.
    pub fn new(master_password: &str) -> Result<Self> {
        Self::with_params(master_password, KdfParams::moderate())
    }

    /// Create a store with explicit KDF parameters.
    pub fn with_params(master_password: &str, kdf_params: KdfParams) -> Result<Self> {
        let salt = Salt::generate();
        let key = crypto::derive_key(master_password, &salt, &kdf_params)?;
        let (ciphertext, nonce) = crypto::encrypt(&key, b"master")?;

        let master = VaultEncryption {
            ciphertext,
            nonce,
            salt,
            hashed_password: key,
        };

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                vaults: HashMap::new(),
                active: None,
                master,
            })),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            kdf_params,
        })
    }

    /// Fire the update listener registered for a vault id, if any.
    ///
    /// Callbacks run outside the listener lock, so a callback may call back
    /// into the store.
    pub fn notify(&self, id: &VaultId) {
        let callback = {
            let listeners = self.listeners.lock().unwrap();
            listeners.get(id).map(|l| l.on_update.clone())
        };
        if let Some(cb) = callback {
            cb();
        }
    }

    /// Number of registered listeners, across all vault ids.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    /// Whether a listener is registered for the given vault id.
    pub fn has_listener(&self, id: &VaultId) -> bool {
        self.listeners.lock().unwrap().contains_key(id)
    }

    fn encrypt_payload(&self, vault: &Vault, password: &str) -> Result<VaultEncryption> {
        let salt = Salt::generate();
        let key = crypto::derive_key(password, &salt, &self.kdf_params)?;
        let payload = serde_json::to_vec(vault)?;
        let (ciphertext, nonce) = crypto::encrypt(&key, &payload)?;
        Ok(VaultEncryption {
            ciphertext,
            nonce,
            salt,
            hashed_password: key,
        })
    }
}

#[async_trait]
impl VaultStore for MemoryVaultStore {
    async fn active_vault(&self) -> Result<Option<ActiveVault>> {
        Ok(self.inner.lock().unwrap().active.clone())
    }

    async fn set_active_vault(&self, vault: Vault) -> Result<()> {
        let id = vault.id.clone();
        {
            let mut inner = self.inner.lock().unwrap();
            let encryption = inner.active.take().and_then(|active| active.encryption);
            inner.active = Some(ActiveVault { vault, encryption });
        }
        self.notify(&id);
        Ok(())
    }

    async fn put_vault(&self, vault: Vault) -> Result<()> {
        let id = vault.id.clone();
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.vaults.entry(id.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().vault = vault,
                Entry::Vacant(entry) => {
                    entry.insert(StoredVault {
                        vault,
                        encryption: None,
                    });
                }
            }
        }
        self.notify(&id);
        Ok(())
    }

    async fn put_protected_vault(&self, vault: Vault, password: &str) -> Result<()> {
        let encryption = self.encrypt_payload(&vault, password)?;
        let id = vault.id.clone();
        self.inner.lock().unwrap().vaults.insert(
            id.clone(),
            StoredVault {
                vault,
                encryption: Some(encryption),
            },
        );
        self.notify(&id);
        Ok(())
    }

    async fn vault(&self, id: &VaultId) -> Result<Option<Vault>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .vaults
            .get(id)
            .map(|s| s.vault.clone()))
    }

    async fn list_vaults(&self) -> Result<Vec<VaultListing>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .vaults
            .values()
            .map(|s| VaultListing {
                vault: s.vault.clone(),
                encryption: s.encryption.clone(),
            })
            .collect())
    }

    async fn encryption_for(&self, id: &VaultId) -> Result<Option<VaultEncryption>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .vaults
            .get(id)
            .and_then(|s| s.encryption.clone()))
    }

    async fn master_encryption(&self) -> Result<VaultEncryption> {
        Ok(self.inner.lock().unwrap().master.clone())
    }

    async fn derive_key(&self, salt: &Salt, password: &str) -> Result<DerivedKey> {
        crypto::derive_key(password, salt, &self.kdf_params)
    }

    async fn init_active_with_credentials(
        &self,
        id: &VaultId,
        credentials: VaultEncryption,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        let stored = inner
            .vaults
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Vault {} not found", id)))?;

        // The credentials must actually decrypt the payload; the slot is
        // only swapped once that holds.
        crypto::decrypt(
            &credentials.hashed_password,
            &credentials.nonce,
            &credentials.ciphertext,
        )
        .map_err(|_| Error::InvalidPassword)?;

        let vault = stored.vault.clone();
        inner.active = Some(ActiveVault {
            vault,
            encryption: Some(credentials),
        });
        Ok(())
    }

    async fn rotate_password(&self, vault: &Vault, new_password: &str) -> Result<()> {
        let encryption = self.encrypt_payload(vault, new_password)?;
        let id = vault.id.clone();
        {
            let mut inner = self.inner.lock().unwrap();

            if !inner.vaults.contains_key(&id) {
                return Err(Error::NotFound(format!("Vault {} not found", id)));
            }
            inner.vaults.insert(
                id.clone(),
                StoredVault {
                    vault: vault.clone(),
                    encryption: Some(encryption.clone()),
                },
            );

            if let Some(active) = inner.active.as_mut() {
                if active.vault.id == id {
                    active.vault = vault.clone();
                    active.encryption = Some(encryption);
                }
            }
        }
        self.notify(&id);
        Ok(())
    }

    async fn register_listener(
        &self,
        id: &VaultId,
        on_update: UpdateCallback,
    ) -> Result<ListenerHandle> {
        let token = Uuid::new_v4().to_string();
        // Insert replaces: at most one listener per vault id.
        self.listeners.lock().unwrap().insert(
            id.clone(),
            Listener {
                token: token.clone(),
                on_update,
            },
        );
        Ok(ListenerHandle {
            vault_id: id.clone(),
            token,
        })
    }

    async fn remove_listener(&self, handle: &ListenerHandle) -> Result<()> {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(listener) = listeners.get(&handle.vault_id) {
            if listener.token == handle.token {
                listeners.remove(&handle.vault_id);
            }
        }
        Ok(())
    }

    async fn is_protected(&self, id: &VaultId) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        let stored = inner
            .vaults
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("Vault {} not found", id)))?;
        Ok(stored.encryption.is_some())
    }
}
