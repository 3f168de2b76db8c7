//! Vault engine for TideVault.
//!
//! This module provides:
//! - The vault data model, including legacy-shape migration
//! - The `VaultStore` boundary trait and an in-memory implementation
//! - Credential management: authentication, password rotation, and the
//!   swap-and-restore protocol for updating inactive protected vaults
//!
//! # Architecture
//! The vault module sits between the user interface and the backing store,
//! and is the only component allowed to swap the active-vault slot.

pub mod credentials;
pub mod memory;
pub mod model;
pub mod store;

pub use credentials::{UpdateProtectedVault, VaultCredentialManager};
pub use memory::MemoryVaultStore;
pub use model::{
    ActiveVault, CustomField, Device, Record, Vault, VaultEncryption, VAULT_VERSION,
};
pub use store::{ListenerHandle, UpdateCallback, VaultListing, VaultStore};
