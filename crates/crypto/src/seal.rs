//! AES-256-GCM sealing of protocol frames.
//!
//! Blob layout on the wire:
//!
//! ```text
//! [12 bytes: nonce][ciphertext][16 bytes: auth tag]
//! ```
//!
//! A fresh random nonce is drawn per message. No associated data is used.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::{CryptoError, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Smallest blob that can carry a nonce and an authentication tag.
pub const MIN_BLOB_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Encrypts `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a `nonce || ciphertext || tag` blob.
///
/// Blobs shorter than [`MIN_BLOB_SIZE`] are rejected before any cipher
/// work; any tag mismatch yields [`CryptoError::Decrypt`].
pub fn open(key: &[u8; KEY_SIZE], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < MIN_BLOB_SIZE {
        return Err(CryptoError::BlobTooShort(blob.len()));
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}
