//! Cryptographic primitives for TideVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Constant-time comparison of derived credentials
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Credential comparison does not leak matching prefixes

pub mod aead;
pub mod kdf;
pub mod keys;

pub use aead::{decrypt, encrypt, NONCE_SIZE};
pub use kdf::{derive_key, KdfParams};
pub use keys::{DerivedKey, Salt, KEY_LENGTH};
