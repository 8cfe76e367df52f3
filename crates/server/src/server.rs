//! TCP accept loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use leo_storage::{Storage, StorageError};

use crate::config::{Credentials, ServerConfig};
use crate::info::ServerInfo;
use crate::session;

/// Errors from server startup and the accept loop.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// The LEO server.
///
/// Binds one listener and spawns an independent session task per accepted
/// connection. Sessions share only the read-only [`ServerInfo`] and the
/// stateless [`Storage`] adapter.
pub struct Server {
    config: ServerConfig,
    storage: Arc<Storage>,
    info: Arc<ServerInfo>,
    credentials: Arc<Credentials>,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    /// Prepares the server: opens the storage root and freezes the
    /// advertised [`ServerInfo`].
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        let storage = Storage::new(&config.storage_path)?;
        let info = ServerInfo::new(&config, storage.root());
        let credentials = config.credentials.clone();

        Ok(Arc::new(Self {
            config,
            storage: Arc::new(storage),
            info: Arc::new(info),
            credentials: Arc::new(credentials),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        }))
    }

    /// The bound address, available once [`run`](Self::run) has bound the
    /// listener. Useful with port 0 in tests.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Signals the accept loop and every session to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!(
            addr = %local_addr,
            root = %self.storage.root().display(),
            "LEO server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let storage = Arc::clone(&self.storage);
                            let info = Arc::clone(&self.info);
                            let credentials = Arc::clone(&self.credentials);
                            let cancel = self.cancel.child_token();
                            tokio::spawn(async move {
                                tracing::debug!(%peer, "connection accepted");
                                if let Err(e) =
                                    session::run(stream, peer, storage, info, credentials, cancel)
                                        .await
                                {
                                    tracing::debug!(%peer, error = %e, "session ended with error");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}
