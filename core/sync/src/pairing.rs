//! Pairing flow for joining an existing vault by invite code.
//!
//! The pairing exchange races a fixed deadline. Whichever side completes
//! first decides the outcome; the loser is abandoned and its eventual
//! result discarded, never surfaced. When the deadline wins, one
//! compensating cancellation is issued against the backend before the
//! timeout is reported.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::reconcile::VaultSyncReconciler;
use tidevault_common::{Error, Result, VaultId};

/// Deadline for the pairing exchange.
pub const PAIR_TIMEOUT: Duration = Duration::from_secs(30);

/// External pairing backend boundary.
#[async_trait]
pub trait PairingBackend: Send + Sync {
    /// Run the pairing exchange for an invite code, yielding the id of the
    /// joined vault.
    async fn pair(&self, invite_code: &str) -> Result<VaultId>;

    /// Cancel an in-flight pairing exchange. Best-effort; callers ignore
    /// its failure.
    async fn cancel_pair(&self) -> Result<()>;
}

/// State of the pairing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    Pairing,
    Paired,
    TimedOut,
    Failed,
}

/// Coordinates a single pairing attempt at a time.
pub struct PairingCoordinator {
    backend: Arc<dyn PairingBackend>,
    reconciler: VaultSyncReconciler,
    timeout: Duration,
    state: Mutex<PairingState>,
}

impl PairingCoordinator {
    /// Create a coordinator with the default deadline.
    pub fn new(backend: Arc<dyn PairingBackend>, reconciler: VaultSyncReconciler) -> Self {
        Self {
            backend,
            reconciler,
            timeout: PAIR_TIMEOUT,
            state: Mutex::new(PairingState::Idle),
        }
    }

    /// Override the pairing deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current pairing state.
    pub fn state(&self) -> PairingState {
        *self.state.lock().unwrap()
    }

    /// Join a vault by invite code.
    ///
    /// On success the vault's live-update listener is registered (exactly
    /// one registration) and the vault id returned.
    ///
    /// # Errors
    /// - `AlreadyPairing` if an attempt is already in flight
    /// - `Timeout` if the deadline fires first; the backend has been asked
    ///   to cancel
    /// - Backend pairing failures, propagated unchanged
    pub async fn pair_active_vault(&self, invite_code: &str) -> Result<VaultId> {
        if invite_code.is_empty() {
            return Err(Error::InvalidInput("Invite code is required".to_string()));
        }

        {
            let mut state = self.state.lock().unwrap();
            if *state == PairingState::Pairing {
                return Err(Error::AlreadyPairing);
            }
            *state = PairingState::Pairing;
        }

        let backend = self.backend.clone();
        let code = invite_code.to_string();
        // Spawned so the losing branch keeps running detached; dropping the
        // handle discards its eventual result instead of surfacing it.
        let mut exchange = tokio::spawn(async move { backend.pair(&code).await });

        tokio::select! {
            joined = &mut exchange => match joined {
                Ok(Ok(vault_id)) => {
                    self.set_state(PairingState::Paired);
                    // The listener stays keyed to the paired vault, not to
                    // whichever vault is active when a notification arrives.
                    self.reconciler.register_pinned_listener(&vault_id).await?;
                    info!(vault_id = %vault_id, "pairing completed");
                    Ok(vault_id)
                }
                Ok(Err(err)) => {
                    // The exchange itself failed: nothing to cancel.
                    self.set_state(PairingState::Failed);
                    Err(err)
                }
                Err(join_err) => {
                    self.set_state(PairingState::Failed);
                    Err(Error::Pairing(format!("pairing task aborted: {}", join_err)))
                }
            },
            _ = sleep(self.timeout) => {
                self.set_state(PairingState::TimedOut);
                drop(exchange);
                if let Err(err) = self.backend.cancel_pair().await {
                    warn!("pairing cancellation after timeout failed: {}", err);
                }
                Err(Error::Timeout)
            }
        }
    }

    /// Caller-initiated cancellation.
    ///
    /// Idempotent: safe to call with no pairing in flight. Cancellation
    /// failures are logged, never returned.
    pub async fn cancel_pair_active_vault(&self) {
        self.set_state(PairingState::Idle);
        if let Err(err) = self.backend.cancel_pair().await {
            warn!("pairing cancellation failed: {}", err);
        }
    }

    fn set_state(&self, state: PairingState) {
        *self.state.lock().unwrap() = state;
    }
}
