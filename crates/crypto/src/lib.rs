//! Cipher primitives for the LEO protocol.
//!
//! Three building blocks, used by both endpoints:
//! - X25519 key agreement for the handshake ([`Keypair`])
//! - HKDF-SHA256 derivation of the two directional session keys
//!   ([`SessionKeys`])
//! - AES-256-GCM sealing of individual frames ([`seal`] / [`open`])
//!
//! Key material is zeroized on drop.

mod keys;
mod seal;
mod session;

pub use keys::{decode_public_key, Keypair, PUBLIC_KEY_SIZE};
pub use seal::{open, seal, MIN_BLOB_SIZE};
pub use session::{generate_session_id, SessionKeys, SESSION_ID_HEX_LEN};

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Errors produced by the cipher primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key encoding")]
    InvalidPublicKey,

    #[error("key derivation failed")]
    KeyDerivation,

    #[error("invalid key length")]
    InvalidKey,

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed: authentication tag mismatch")]
    Decrypt,

    #[error("ciphertext blob too short: {0} bytes (need at least {MIN_BLOB_SIZE})")]
    BlobTooShort(usize),
}

/// Compares two byte strings in constant time.
///
/// Used for credential checks so the comparison does not leak a prefix
/// length through timing. Inputs of different lengths compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
