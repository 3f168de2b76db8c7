//! Reconciliation between the cached vault and the backing store.
//!
//! The reconciler detects drift: the store's notion of the current vault
//! moving away from what the client last fetched. It re-fetches on demand
//! and on live-update notifications, re-registering the update listener on
//! every fetch (registration replaces, so repeated calls never stack
//! listeners).
//!
//! Overlapping re-fetches are resolved by sequence-numbering each fetch at
//! start: a completion only lands in the cache if no later-started fetch
//! has already been applied, so the last-started fetch is authoritative
//! regardless of completion order.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tidevault_common::{Error, Result, VaultId};
use tidevault_vault::{ListenerHandle, Vault, VaultListing, VaultStore};

/// Drives re-fetch and listener re-registration for the current vault.
///
/// Cheap to clone; clones share the cache and sequence counters.
#[derive(Clone)]
pub struct VaultSyncReconciler {
    store: Arc<dyn VaultStore>,
    default_vault_id: Option<VaultId>,
    cached: Arc<RwLock<Option<Vault>>>,
    listings: Arc<RwLock<Vec<VaultListing>>>,
    fetch_seq: Arc<AtomicU64>,
    applied_seq: Arc<AtomicU64>,
}

impl VaultSyncReconciler {
    /// Create a reconciler over the given store.
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self {
            store,
            default_vault_id: None,
            cached: Arc::new(RwLock::new(None)),
            listings: Arc::new(RwLock::new(Vec::new())),
            fetch_seq: Arc::new(AtomicU64::new(0)),
            applied_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Set a default vault id used when `refetch` is called without one.
    pub fn with_default_vault(mut self, id: VaultId) -> Self {
        self.default_vault_id = Some(id);
        self
    }

    /// The vault most recently applied to the cache.
    pub async fn cached_vault(&self) -> Option<Vault> {
        self.cached.read().await.clone()
    }

    /// The vault listing from the last refresh.
    pub async fn vault_listings(&self) -> Vec<VaultListing> {
        self.listings.read().await.clone()
    }

    /// Re-fetch a vault into the cache.
    ///
    /// The target id resolves with precedence: explicit argument, then the
    /// reconciler's default, then the store's current active vault. When
    /// none resolves this logs and returns `Ok(None)` — a deliberately
    /// soft no-op, not a failure.
    pub async fn refetch(&self, vault_id: Option<&VaultId>) -> Result<Option<Vault>> {
        let id = match vault_id.cloned().or_else(|| self.default_vault_id.clone()) {
            Some(id) => id,
            None => match self.store.active_vault().await? {
                Some(active) => active.vault.id,
                None => {
                    debug!("refetch: no vault id resolvable, skipping");
                    return Ok(None);
                }
            },
        };

        let vault = self.fetch_vault(&id).await?;
        Ok(Some(vault))
    }

    /// Compare the store's current vault against the cached one and correct
    /// drift.
    ///
    /// Returns `true` when drift was found and corrected: the vault listing
    /// is refreshed and the store's current vault fully re-fetched. Safe to
    /// call repeatedly; listener re-registration replaces rather than
    /// stacks.
    pub async fn sync_vault(&self) -> Result<bool> {
        let external = match self.store.active_vault().await? {
            Some(active) => active.vault,
            None => return Ok(false),
        };

        let cached_id = self.cached.read().await.as_ref().map(|v| v.id.clone());
        if cached_id.as_ref() == Some(&external.id) {
            return Ok(false);
        }

        debug!(
            external = %external.id,
            cached = cached_id.as_ref().map(|id| id.as_str()).unwrap_or("<none>"),
            "vault drift detected"
        );

        self.refresh_vault_list().await?;
        self.fetch_vault(&external.id).await?;
        Ok(true)
    }

    /// Refresh the cached vault listing from the store.
    pub async fn refresh_vault_list(&self) -> Result<()> {
        let listings = self.store.list_vaults().await?;
        *self.listings.write().await = listings;
        Ok(())
    }

    /// Register the live-update listener for a vault id.
    ///
    /// The callback re-fetches using the store's active vault id at
    /// notification time, not the id captured here.
    pub async fn register_update_listener(&self, id: &VaultId) -> Result<ListenerHandle> {
        let reconciler = self.clone();
        self.store
            .register_listener(
                id,
                Arc::new(move || {
                    tokio::spawn(refetch_for_active(reconciler.clone()));
                }),
            )
            .await
    }

    /// Register a live-update listener that stays keyed to the id captured
    /// here, regardless of which vault is active when the notification
    /// arrives. Used for a freshly paired vault.
    pub async fn register_pinned_listener(&self, id: &VaultId) -> Result<ListenerHandle> {
        let reconciler = self.clone();
        let pinned = id.clone();
        self.store
            .register_listener(
                id,
                Arc::new(move || {
                    tokio::spawn(refetch_pinned(reconciler.clone(), pinned.clone()));
                }),
            )
            .await
    }

    /// Fetch a vault, re-register its listener, and apply the result to the
    /// cache under sequence gating.
    async fn fetch_vault(&self, id: &VaultId) -> Result<Vault> {
        let vault = self.fetch_into_cache(id).await?;
        self.register_update_listener(id).await?;
        Ok(vault)
    }

    /// Fetch a vault and apply it to the cache under sequence gating,
    /// without touching listener registrations.
    async fn fetch_into_cache(&self, id: &VaultId) -> Result<Vault> {
        let seq = self.fetch_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let vault = self
            .store
            .vault(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Vault {} not found", id)))?;

        self.apply_fetch(seq, vault.clone()).await;
        Ok(vault)
    }

    async fn apply_fetch(&self, seq: u64, vault: Vault) {
        let mut cached = self.cached.write().await;
        if seq < self.applied_seq.load(Ordering::SeqCst) {
            // A later-started fetch already landed; this completion is
            // stale and must not overwrite it.
            debug!(vault_id = %vault.id, "discarding stale fetch completion");
            return;
        }
        self.applied_seq.store(seq, Ordering::SeqCst);
        *cached = Some(vault);
    }
}

/// Re-fetch keyed to whichever vault the store considers active right now.
///
/// Boxed so the listener callback does not embed the fetch future type
/// recursively.
fn refetch_for_active(reconciler: VaultSyncReconciler) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match reconciler.store.active_vault().await {
            Ok(Some(active)) => {
                if let Err(err) = reconciler.fetch_vault(&active.vault.id).await {
                    warn!("listener refetch failed: {}", err);
                }
            }
            Ok(None) => debug!("update notification with no active vault, skipping"),
            Err(err) => warn!("failed to resolve active vault on notification: {}", err),
        }
    })
}

/// Re-fetch the vault a pinned listener was registered for.
fn refetch_pinned(reconciler: VaultSyncReconciler, id: VaultId) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        if let Err(err) = reconciler.fetch_into_cache(&id).await {
            warn!(vault_id = %id, "pinned listener refetch failed: {}", err);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tidevault_crypto::{DerivedKey, KdfParams, Salt};
    use tidevault_vault::{
        ActiveVault, MemoryVaultStore, UpdateCallback, VaultEncryption, VAULT_VERSION,
    };

    fn memory_store() -> Arc<MemoryVaultStore> {
        Arc::new(MemoryVaultStore::with_params("master-password", KdfParams::insecure_fast()).unwrap())
    }

    fn test_vault(id: &str) -> Vault {
        Vault {
            id: VaultId::new(id).unwrap(),
            name: format!("vault {}", id),
            version: VAULT_VERSION,
            records: vec![],
            devices: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Wrapper counting fetch and list calls, for asserting that no-drift
    /// paths perform no fetches.
    struct CountingStore {
        inner: Arc<MemoryVaultStore>,
        vault_calls: AtomicUsize,
        list_calls: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: Arc<MemoryVaultStore>) -> Self {
            Self {
                inner,
                vault_calls: AtomicUsize::new(0),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VaultStore for CountingStore {
        async fn active_vault(&self) -> Result<Option<ActiveVault>> {
            self.inner.active_vault().await
        }
        async fn set_active_vault(&self, vault: Vault) -> Result<()> {
            self.inner.set_active_vault(vault).await
        }
        async fn put_vault(&self, vault: Vault) -> Result<()> {
            self.inner.put_vault(vault).await
        }
        async fn put_protected_vault(&self, vault: Vault, password: &str) -> Result<()> {
            self.inner.put_protected_vault(vault, password).await
        }
        async fn vault(&self, id: &VaultId) -> Result<Option<Vault>> {
            self.vault_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.vault(id).await
        }
        async fn list_vaults(&self) -> Result<Vec<VaultListing>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.list_vaults().await
        }
        async fn encryption_for(&self, id: &VaultId) -> Result<Option<VaultEncryption>> {
            self.inner.encryption_for(id).await
        }
        async fn master_encryption(&self) -> Result<VaultEncryption> {
            self.inner.master_encryption().await
        }
        async fn derive_key(&self, salt: &Salt, password: &str) -> Result<DerivedKey> {
            self.inner.derive_key(salt, password).await
        }
        async fn init_active_with_credentials(
            &self,
            id: &VaultId,
            credentials: VaultEncryption,
        ) -> Result<()> {
            self.inner.init_active_with_credentials(id, credentials).await
        }
        async fn rotate_password(&self, vault: &Vault, new_password: &str) -> Result<()> {
            self.inner.rotate_password(vault, new_password).await
        }
        async fn register_listener(
            &self,
            id: &VaultId,
            on_update: UpdateCallback,
        ) -> Result<ListenerHandle> {
            self.inner.register_listener(id, on_update).await
        }
        async fn remove_listener(&self, handle: &ListenerHandle) -> Result<()> {
            self.inner.remove_listener(handle).await
        }
        async fn is_protected(&self, id: &VaultId) -> Result<bool> {
            self.inner.is_protected(id).await
        }
    }

    #[tokio::test]
    async fn test_refetch_nothing_resolvable_is_soft_noop() {
        let memory = memory_store();
        let store = Arc::new(CountingStore::new(memory));
        let reconciler = VaultSyncReconciler::new(store.clone());

        let result = reconciler.refetch(None).await.unwrap();

        assert!(result.is_none());
        assert_eq!(store.vault_calls.load(Ordering::SeqCst), 0);
        assert!(reconciler.cached_vault().await.is_none());
    }

    #[tokio::test]
    async fn test_refetch_explicit_id() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        memory.put_vault(v1.clone()).await.unwrap();

        let reconciler = VaultSyncReconciler::new(memory.clone());
        let fetched = reconciler.refetch(Some(&v1.id)).await.unwrap().unwrap();

        assert_eq!(fetched, v1);
        assert_eq!(reconciler.cached_vault().await, Some(v1.clone()));
        assert!(memory.has_listener(&v1.id));
    }

    #[tokio::test]
    async fn test_refetch_unknown_vault_is_not_found() {
        let memory = memory_store();
        let reconciler = VaultSyncReconciler::new(memory);

        let err = reconciler
            .refetch(Some(&VaultId::new("ghost").unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_refetch_falls_back_to_default_then_active() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        let v2 = test_vault("v2");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.put_vault(v2.clone()).await.unwrap();
        memory.set_active_vault(v2.clone()).await.unwrap();

        // Default takes precedence over the active vault.
        let with_default =
            VaultSyncReconciler::new(memory.clone()).with_default_vault(v1.id.clone());
        assert_eq!(
            with_default.refetch(None).await.unwrap().unwrap().id,
            v1.id
        );

        // Without a default, the active vault resolves.
        let without_default = VaultSyncReconciler::new(memory.clone());
        assert_eq!(
            without_default.refetch(None).await.unwrap().unwrap().id,
            v2.id
        );
    }

    #[tokio::test]
    async fn test_repeated_refetch_replaces_listener() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        memory.put_vault(v1.clone()).await.unwrap();

        let reconciler = VaultSyncReconciler::new(memory.clone());
        reconciler.refetch(Some(&v1.id)).await.unwrap();
        reconciler.refetch(Some(&v1.id)).await.unwrap();

        assert_eq!(memory.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_sync_vault_detects_and_corrects_drift() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        let v2 = test_vault("v2");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.put_vault(v2.clone()).await.unwrap();

        let store = Arc::new(CountingStore::new(memory.clone()));
        let reconciler = VaultSyncReconciler::new(store.clone());

        // Cache holds v1; store then moves to v2.
        reconciler.refetch(Some(&v1.id)).await.unwrap();
        memory.set_active_vault(v2.clone()).await.unwrap();

        let drifted = reconciler.sync_vault().await.unwrap();

        assert!(drifted);
        assert_eq!(reconciler.cached_vault().await, Some(v2.clone()));
        assert_eq!(reconciler.vault_listings().await.len(), 2);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sync_vault_without_drift_performs_no_fetch() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.set_active_vault(v1.clone()).await.unwrap();

        let store = Arc::new(CountingStore::new(memory));
        let reconciler = VaultSyncReconciler::new(store.clone());
        reconciler.refetch(Some(&v1.id)).await.unwrap();

        let fetches_before = store.vault_calls.load(Ordering::SeqCst);
        let drifted = reconciler.sync_vault().await.unwrap();

        assert!(!drifted);
        assert_eq!(store.vault_calls.load(Ordering::SeqCst), fetches_before);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sync_vault_with_no_active_vault_reports_no_drift() {
        let memory = memory_store();
        let reconciler = VaultSyncReconciler::new(memory);

        assert!(!reconciler.sync_vault().await.unwrap());
    }

    #[tokio::test]
    async fn test_notification_refetches_active_at_notification_time() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        let v2 = test_vault("v2");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.put_vault(v2.clone()).await.unwrap();
        memory.set_active_vault(v1.clone()).await.unwrap();

        let reconciler = VaultSyncReconciler::new(memory.clone());
        reconciler.refetch(Some(&v1.id)).await.unwrap();

        // The active vault moves after registration; the notification for
        // v1 must re-fetch v2, the active vault at notification time.
        memory.set_active_vault(v2.clone()).await.unwrap();
        memory.notify(&v1.id);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if reconciler.cached_vault().await.map(|v| v.id) == Some(v2.id.clone()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "refetch never landed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_pinned_listener_refetches_its_own_id() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        let v2 = test_vault("v2");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.put_vault(v2.clone()).await.unwrap();
        memory.set_active_vault(v2.clone()).await.unwrap();

        let reconciler = VaultSyncReconciler::new(memory.clone());
        reconciler.register_pinned_listener(&v1.id).await.unwrap();

        // v2 is active, but the pinned listener must still fetch v1.
        memory.notify(&v1.id);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if reconciler.cached_vault().await.map(|v| v.id) == Some(v1.id.clone()) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "refetch never landed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_stale_fetch_completion_is_discarded() {
        let memory = memory_store();
        let v1 = test_vault("v1");
        let v2 = test_vault("v2");
        memory.put_vault(v1.clone()).await.unwrap();
        memory.put_vault(v2.clone()).await.unwrap();

        let reconciler = VaultSyncReconciler::new(memory);

        // Simulate two overlapping fetches completing out of order: the
        // later-started fetch (seq 2) lands first.
        reconciler.apply_fetch(2, v2.clone()).await;
        reconciler.apply_fetch(1, v1.clone()).await;

        assert_eq!(reconciler.cached_vault().await, Some(v2));
    }
}
