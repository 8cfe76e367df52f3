//! TCP server for the LEO protocol.
//!
//! One task per accepted connection; each runs a [`session`] actor that
//! walks the handshake, authenticates the peer, and serves commands against
//! the shared [`leo_storage::Storage`] sandbox. Sessions share nothing
//! mutable besides the filesystem itself.

mod config;
mod info;
mod server;
mod session;

pub use config::{ConfigError, Credentials, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use info::ServerInfo;
pub use server::{Server, ServerError};
pub use session::SessionError;
