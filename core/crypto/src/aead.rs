//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.
//!
//! The nonce is kept separate from the ciphertext because vault encryption
//! records store the two as distinct fields.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng},
    XChaCha20Poly1305,
};

use crate::keys::DerivedKey;
use tidevault_common::{Error, Result};

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Encrypt plaintext under a derived key.
///
/// # Postconditions
/// - Returns `(ciphertext, nonce)` with a randomly generated nonce
/// - The ciphertext carries a Poly1305 authentication tag
///
/// # Errors
/// - Returns error if encryption fails
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

    Ok((ciphertext, nonce.to_vec()))
}

/// Decrypt ciphertext under a derived key.
///
/// # Preconditions
/// - `nonce` must be exactly NONCE_SIZE bytes
///
/// # Errors
/// - Returns error if the nonce has the wrong length
/// - Returns error if authentication fails (wrong key or tampered data)
pub fn decrypt(key: &DerivedKey, nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::Crypto(format!(
            "Invalid nonce length: expected {}, got {}",
            NONCE_SIZE,
            nonce.len()
        )));
    }

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("Decryption failed: authentication error".to_string()))
}
