//! Wire protocol for LEO.
//!
//! Two framings share the socket, in sequence: one newline-terminated JSON
//! line per direction for the handshake, then length-prefixed AES-GCM blobs
//! for everything else. This crate owns the message schema, the framing
//! codec, and the stable error codes; it performs no I/O and no crypto.

pub mod consts;
pub mod framing;
pub mod messages;

pub use framing::{encode_frame, FrameBuffer, FrameError, LineBuffer};
pub use messages::{
    decode_message, DecodeError, EntryKind, ErrorCode, ListItem, Message,
};
