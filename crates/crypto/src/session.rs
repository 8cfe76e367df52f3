//! Directional session keys derived from the handshake.

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, KEY_SIZE};

/// Length of a session identifier on the wire: 8 random bytes, hex-encoded.
pub const SESSION_ID_HEX_LEN: usize = 16;

/// Prefix of the HKDF info string; the session id is appended.
const INFO_PREFIX: &str = "LEO-SESSION-";

/// The two directional AES-256 keys of an established session.
///
/// `c2s` protects client-to-server traffic, `s2c` the reverse direction.
/// Separate keys per direction keep a reflected frame from decrypting.
/// Both keys are wiped when the session is dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    pub c2s: [u8; KEY_SIZE],
    pub s2c: [u8; KEY_SIZE],
}

impl SessionKeys {
    /// Derives both directional keys from the X25519 shared secret.
    ///
    /// HKDF-SHA256 with an empty salt and `LEO-SESSION-<sessionId>` as the
    /// info string, expanded to 64 bytes: the first 32 are `c2s`, the next
    /// 32 are `s2c`. Both endpoints run the same derivation in the same
    /// order.
    pub fn derive(shared_secret: &[u8; 32], session_id: &str) -> Result<Self, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
        let info = format!("{INFO_PREFIX}{session_id}");

        let mut okm = [0u8; KEY_SIZE * 2];
        hkdf.expand(info.as_bytes(), &mut okm)
            .map_err(|_| CryptoError::KeyDerivation)?;

        let mut c2s = [0u8; KEY_SIZE];
        let mut s2c = [0u8; KEY_SIZE];
        c2s.copy_from_slice(&okm[..KEY_SIZE]);
        s2c.copy_from_slice(&okm[KEY_SIZE..]);
        okm.zeroize();

        Ok(Self { c2s, s2c })
    }
}

/// Generates a fresh session identifier: 8 random bytes, lowercase hex.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_HEX_LEN / 2];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
