//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of derived keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Key derived from a vault password.
///
/// This doubles as the stored password verifier: a vault's encryption record
/// keeps the derived key of the password that currently protects it, and
/// authentication compares a freshly derived key against it.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_LENGTH],
}

impl DerivedKey {
    /// Create a derived key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Constant-time equality check against another derived key.
    ///
    /// Comparison time does not depend on how many leading bytes match,
    /// so a caller cannot learn hash prefixes through timing.
    pub fn ct_eq(&self, other: &DerivedKey) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_key_ct_eq() {
        let a = DerivedKey::from_bytes([7u8; KEY_LENGTH]);
        let b = DerivedKey::from_bytes([7u8; KEY_LENGTH]);
        let c = DerivedKey::from_bytes([8u8; KEY_LENGTH]);

        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn test_derived_key_single_byte_difference() {
        let mut bytes = [7u8; KEY_LENGTH];
        bytes[KEY_LENGTH - 1] ^= 1;

        let a = DerivedKey::from_bytes([7u8; KEY_LENGTH]);
        let b = DerivedKey::from_bytes(bytes);

        assert!(!a.ct_eq(&b));
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }
}
