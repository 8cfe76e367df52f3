//! X25519 key agreement for the LEO handshake.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::CryptoError;

/// Length of a raw X25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// An X25519 keypair, generated fresh for every connection.
///
/// The public key travels as base64 of its raw 32-byte representation;
/// both endpoints of this implementation use the same serialization.
/// The secret is zeroized by `x25519_dalek` when the keypair is dropped.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    /// Generates a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Raw public key bytes.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public.to_bytes()
    }

    /// Public key in its wire form: base64 of the raw bytes.
    pub fn public_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// X25519 Diffie-Hellman against a peer's raw public key.
    ///
    /// Both sides compute the same 32-byte shared secret.
    pub fn diffie_hellman(&self, their_public: &[u8; PUBLIC_KEY_SIZE]) -> [u8; 32] {
        let their_public = PublicKey::from(*their_public);
        self.secret.diffie_hellman(&their_public).to_bytes()
    }
}

/// Decodes a base64 public key received in a hello message.
pub fn decode_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_SIZE], CryptoError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_agrees_on_both_sides() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();

        let alice_shared = alice.diffie_hellman(&bob.public_bytes());
        let bob_shared = bob.diffie_hellman(&alice.public_bytes());

        assert_eq!(alice_shared, bob_shared);
    }

    #[test]
    fn keypairs_are_unique() {
        let a = Keypair::generate();
        let b = Keypair::generate();
        assert_ne!(a.public_bytes(), b.public_bytes());
    }

    #[test]
    fn public_key_base64_roundtrip() {
        let keypair = Keypair::generate();
        let encoded = keypair.public_base64();
        let decoded = decode_public_key(&encoded).unwrap();
        assert_eq!(decoded, keypair.public_bytes());
    }

    #[test]
    fn decode_rejects_bad_base64() {
        assert!(decode_public_key("not base64 at all!!!").is_err());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let short = STANDARD.encode([0u8; 16]);
        assert!(decode_public_key(&short).is_err());
        let long = STANDARD.encode([0u8; 48]);
        assert!(decode_public_key(&long).is_err());
    }
}
