//! Client engine for the LEO protocol.
//!
//! [`Client::connect`] opens the TCP connection, runs the handshake and
//! derives the session keys; a background read pump then decrypts inbound
//! frames into a FIFO mailbox. Commands are strictly sequential, so every
//! request awaits the next inbound message with a per-request timeout.

mod client;
mod mailbox;

pub use client::{Client, ClientConfig, RemoteInfo};

use leo_protocol::messages::ErrorCode;

/// Errors surfaced to callers of the client engine.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto failure: {0}")]
    Crypto(#[from] leo_crypto::CryptoError),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server {
        code: ErrorCode,
        message: String,
        details: Option<String>,
    },

    #[error("expected GET_META, got something else")]
    GetMetaMissing,

    #[error("incomplete download: expected {expected} bytes, received {received}")]
    GetIncomplete { expected: u64, received: u64 },

    #[error("unexpected message: {0}")]
    Unexpected(&'static str),
}

/// Errors from environment-based client configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value}")]
    InvalidVar { var: &'static str, value: String },
}
