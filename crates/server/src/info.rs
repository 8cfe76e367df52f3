//! Immutable per-process server description, served by `INFO`.

use std::path::Path;

use crate::config::ServerConfig;

/// Snapshot advertised in `INFO_RESULT`. Built once at startup and shared
/// read-only across sessions.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub version: String,
    pub protocol_version: u32,
    pub capabilities: Vec<String>,
    pub storage_root: Option<String>,
    pub max_upload_size: Option<u64>,
}

impl ServerInfo {
    pub fn new(config: &ServerConfig, storage_root: &Path) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            protocol_version: config.protocol_version,
            capabilities: config.capabilities.clone(),
            storage_root: Some(storage_root.to_string_lossy().into_owned()),
            max_upload_size: config.max_upload_size,
        }
    }
}
