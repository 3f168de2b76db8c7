//! TideVault sync layer.
//!
//! This module provides:
//! - The pairing flow for joining an existing vault by invite code,
//!   including the deadline race and compensating cancellation
//! - Reconciliation between the locally cached vault and the vault the
//!   backing store currently considers authoritative

pub mod pairing;
pub mod reconcile;

pub use pairing::{PairingBackend, PairingCoordinator, PairingState, PAIR_TIMEOUT};
pub use reconcile::VaultSyncReconciler;
