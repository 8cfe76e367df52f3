//! Protocol constants shared by both endpoints.

use std::time::Duration;

/// Numeric protocol version carried in the hello messages.
pub const PROTOCOL_VERSION: u32 = 1;

/// The single mandatory ciphersuite.
pub const CIPHER: &str = "AES-256-GCM";

/// The single mandatory key-exchange algorithm.
pub const KEX: &str = "X25519";

/// Maximum accepted length of one encrypted frame (16 MiB).
///
/// A frame whose declared length exceeds this is a fatal protocol error.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Maximum accepted length of a handshake line.
pub const MAX_HELLO_SIZE: usize = 16 * 1024;

/// Chunk size for streaming PUT and GET payloads.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

/// Time the server allows for the handshake, measured from accept.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default client-side timeout for one request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Command tags advertised in `INFO_RESULT` by default.
pub const DEFAULT_CAPABILITIES: &[&str] = &["AUTH", "PUT", "GET", "LIST", "DEL", "INFO", "BYE"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_chunk_matches_wire_contract() {
        assert_eq!(TRANSFER_CHUNK_SIZE, 65_536);
    }

    #[test]
    fn defaults_cover_every_command() {
        for tag in ["AUTH", "PUT", "GET", "LIST", "DEL", "INFO", "BYE"] {
            assert!(DEFAULT_CAPABILITIES.contains(&tag));
        }
    }
}
