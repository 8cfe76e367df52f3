//! The client engine: handshake initiator, request issuer, read pump.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use leo_crypto::{self as crypto, Keypair, SessionKeys};
use leo_protocol::consts::{
    CIPHER, DEFAULT_REQUEST_TIMEOUT, KEX, PROTOCOL_VERSION, TRANSFER_CHUNK_SIZE,
};
use leo_protocol::framing::{encode_frame, FrameBuffer, LineBuffer};
use leo_protocol::messages::{decode_message, ListItem, Message};

use crate::mailbox::{Mailbox, Waiting};
use crate::{ClientError, ConfigError};

/// Read granularity for the pump loop.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Connection parameters for [`Client::connect`].
#[derive(Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Time allowed for one request/response exchange (and the handshake).
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5555,
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Reads `LEO_HOST`, `LEO_PORT`, `LEO_USER`, `LEO_PASS` and
    /// `LEO_TIMEOUT_MS`, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("LEO_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("LEO_PORT") {
            config.port = port.parse().map_err(|_| ConfigError::InvalidVar {
                var: "LEO_PORT",
                value: port,
            })?;
        }
        if let Ok(user) = std::env::var("LEO_USER") {
            config.username = user;
        }
        if let Ok(pass) = std::env::var("LEO_PASS") {
            config.password = pass;
        }
        if let Ok(ms) = std::env::var("LEO_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| ConfigError::InvalidVar {
                var: "LEO_TIMEOUT_MS",
                value: ms,
            })?;
            config.timeout = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

/// What the server reported in `INFO_RESULT`.
#[derive(Debug, Clone)]
pub struct RemoteInfo {
    pub version: String,
    pub protocol_version: u32,
    pub capabilities: Vec<String>,
    pub storage_root: Option<String>,
    pub max_upload_size: Option<u64>,
}

/// A connected LEO client.
///
/// One command at a time; responses are matched positionally by the
/// mailbox. Dropping the client tears the read pump down.
pub struct Client {
    write: OwnedWriteHalf,
    keys: SessionKeys,
    session_id: String,
    mailbox: Arc<Mailbox>,
    timeout: Duration,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
}

impl Client {
    /// Opens the TCP connection and performs the handshake.
    pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let (mut read, mut write) = stream.into_split();

        let keypair = Keypair::generate();
        let hello = Message::ClientHello {
            version: PROTOCOL_VERSION,
            cipher: CIPHER.to_owned(),
            kex: KEX.to_owned(),
            client_public_key: keypair.public_base64(),
        };
        let mut line = serde_json::to_vec(&hello)?;
        line.push(b'\n');
        write.write_all(&line).await?;

        let (reply, leftover) =
            tokio::time::timeout(config.timeout, read_handshake_line(&mut read))
                .await
                .map_err(|_| ClientError::Timeout)??;

        let server_hello: Message = serde_json::from_str(&reply)
            .map_err(|e| ClientError::Handshake(format!("unreadable SERVER_HELLO: {e}")))?;
        let Message::ServerHello {
            ok,
            version,
            cipher,
            kex,
            server_public_key,
            session_id,
            error,
        } = server_hello
        else {
            return Err(ClientError::Handshake("expected SERVER_HELLO".into()));
        };

        if !ok {
            let reason = error.unwrap_or_else(|| "server refused the handshake".into());
            return Err(ClientError::Handshake(reason));
        }
        if version != PROTOCOL_VERSION || cipher != CIPHER || kex != KEX {
            return Err(ClientError::Handshake(format!(
                "unsupported parameters: version={version} cipher={cipher} kex={kex}"
            )));
        }

        let server_public = crypto::decode_public_key(&server_public_key)?;
        let mut shared = keypair.diffie_hellman(&server_public);
        let keys = SessionKeys::derive(&shared, &session_id)?;
        shared.zeroize();

        let mailbox = Arc::new(Mailbox::default());
        let cancel = CancellationToken::new();
        let read_handle = tokio::spawn(read_pump(
            read,
            keys.s2c,
            leftover,
            Arc::clone(&mailbox),
            cancel.clone(),
        ));

        tracing::debug!(session = %session_id, "handshake complete");
        Ok(Self {
            write,
            keys,
            session_id,
            mailbox,
            timeout: config.timeout,
            cancel,
            _read_handle: read_handle,
        })
    }

    /// The server-chosen session identifier.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Authenticates with the configured credentials.
    pub async fn auth(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        self.send(&Message::Auth {
            username: username.to_owned(),
            password: password.to_owned(),
        })
        .await?;
        match self.expect_reply().await? {
            Message::AuthOk => Ok(()),
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    /// Uploads a local file to `remote`, streaming fixed-size chunks.
    pub async fn put(&mut self, local: impl AsRef<Path>, remote: &str) -> Result<(), ClientError> {
        let data = tokio::fs::read(local).await?;
        self.send(&Message::PutBegin {
            path: remote.to_owned(),
            size: data.len() as u64,
        })
        .await?;

        let mut offset = 0u64;
        for chunk in data.chunks(TRANSFER_CHUNK_SIZE) {
            self.send(&Message::PutChunk {
                path: remote.to_owned(),
                offset,
                data: chunk.to_vec(),
            })
            .await?;
            offset += chunk.len() as u64;
        }

        self.send(&Message::PutEnd {
            path: remote.to_owned(),
        })
        .await?;

        match self.expect_reply().await? {
            Message::PutOk { .. } => {
                tracing::debug!(remote, bytes = data.len(), "upload complete");
                Ok(())
            }
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    /// Downloads `remote` into a local file, creating parent directories.
    pub async fn get(&mut self, remote: &str, local: impl AsRef<Path>) -> Result<(), ClientError> {
        let data = self.get_bytes(remote).await?;

        let local = local.as_ref();
        if let Some(parent) = local.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(local, &data).await?;
        Ok(())
    }

    /// Downloads `remote` into memory.
    pub async fn get_bytes(&mut self, remote: &str) -> Result<Vec<u8>, ClientError> {
        self.send(&Message::GetBegin {
            path: remote.to_owned(),
        })
        .await?;

        let size = match self.expect_reply().await? {
            Message::GetMeta { size, .. } => size,
            _ => return Err(ClientError::GetMetaMissing),
        };

        let mut buf: Vec<u8> = Vec::new();
        loop {
            match self.expect_reply().await? {
                Message::GetChunk { offset, data, .. } => {
                    let end = offset as usize + data.len();
                    if buf.len() < end {
                        buf.resize(end, 0);
                    }
                    buf[offset as usize..end].copy_from_slice(&data);
                }
                Message::GetEnd { .. } => break,
                other => return Err(ClientError::Unexpected(other.type_name())),
            }
        }

        if buf.len() as u64 != size {
            return Err(ClientError::GetIncomplete {
                expected: size,
                received: buf.len() as u64,
            });
        }
        tracing::debug!(remote, bytes = buf.len(), "download complete");
        Ok(buf)
    }

    /// Lists a remote directory.
    pub async fn list(&mut self, remote: &str) -> Result<Vec<ListItem>, ClientError> {
        self.send(&Message::List {
            path: remote.to_owned(),
        })
        .await?;
        match self.expect_reply().await? {
            Message::ListResult { items, .. } => Ok(items),
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    /// Deletes a remote file.
    pub async fn del(&mut self, remote: &str) -> Result<(), ClientError> {
        self.send(&Message::Del {
            path: remote.to_owned(),
        })
        .await?;
        match self.expect_reply().await? {
            Message::DelOk { .. } => Ok(()),
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    /// Fetches the server's self-description.
    pub async fn info(&mut self) -> Result<RemoteInfo, ClientError> {
        self.send(&Message::Info).await?;
        match self.expect_reply().await? {
            Message::InfoResult {
                version,
                protocol_version,
                capabilities,
                storage_root,
                max_upload_size,
            } => Ok(RemoteInfo {
                version,
                protocol_version,
                capabilities,
                storage_root,
                max_upload_size,
            }),
            other => Err(ClientError::Unexpected(other.type_name())),
        }
    }

    /// Says goodbye and half-closes the connection. Consumes the client.
    pub async fn bye(mut self) -> Result<(), ClientError> {
        self.send(&Message::Bye).await?;
        let _ = self.write.shutdown().await;
        Ok(())
    }

    /// Encrypts and writes one message on the client-to-server key.
    async fn send(&mut self, msg: &Message) -> Result<(), ClientError> {
        let json = serde_json::to_vec(msg)?;
        let blob = crypto::seal(&self.keys.c2s, &json)?;
        self.write.write_all(&encode_frame(&blob)).await?;
        Ok(())
    }

    /// Awaits the next inbound message within the configured timeout.
    async fn recv(&self) -> Result<Message, ClientError> {
        match self.mailbox.register()? {
            Waiting::Ready(msg) => Ok(msg),
            Waiting::Pending(rx) => match tokio::time::timeout(self.timeout, rx).await {
                Ok(Ok(msg)) => Ok(msg),
                Ok(Err(_)) => Err(ClientError::Closed),
                Err(_) => Err(ClientError::Timeout),
            },
        }
    }

    /// Like [`recv`](Self::recv), but turns server error shapes into typed
    /// errors.
    async fn expect_reply(&self) -> Result<Message, ClientError> {
        match self.recv().await? {
            Message::Error {
                error_code,
                message,
                details,
                ..
            } => Err(ClientError::Server {
                code: error_code,
                message,
                details,
            }),
            Message::AuthError {
                error,
                error_code,
                message,
                details,
            } => Err(ClientError::Server {
                code: error_code,
                message: message.unwrap_or(error),
                details,
            }),
            Message::DelError {
                error_code, message, ..
            } => Err(ClientError::Server {
                code: error_code,
                message,
                details: None,
            }),
            msg => Ok(msg),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Reads the single `SERVER_HELLO` line, preserving trailing bytes.
async fn read_handshake_line(read: &mut OwnedReadHalf) -> Result<(String, Vec<u8>), ClientError> {
    let mut line_buf = LineBuffer::new();
    let mut chunk = [0u8; READ_BUF_SIZE];
    loop {
        let n = read.read(&mut chunk).await?;
        if n == 0 {
            return Err(ClientError::Closed);
        }
        match line_buf.push(&chunk[..n]) {
            Ok(Some(split)) => return Ok(split),
            Ok(None) => {}
            Err(e) => return Err(ClientError::Handshake(e.to_string())),
        }
    }
}

/// Background task: decrypts inbound frames into the mailbox.
///
/// Any framing, decryption or decode failure from the server is fatal for
/// the connection; the mailbox then rejects all pending waiters.
async fn read_pump(
    mut read: OwnedReadHalf,
    s2c: [u8; 32],
    leftover: Vec<u8>,
    mailbox: Arc<Mailbox>,
    cancel: CancellationToken,
) {
    let mut frames = FrameBuffer::new();
    frames.extend(&leftover);
    let mut chunk = [0u8; READ_BUF_SIZE];

    'pump: loop {
        loop {
            let frame = match frames.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "framing violation from server");
                    break 'pump;
                }
            };
            let plaintext = match crypto::open(&s2c, &frame) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decrypt server frame");
                    break 'pump;
                }
            };
            match decode_message(&plaintext) {
                Ok(msg) => {
                    tracing::trace!(msg = msg.type_name(), "received");
                    mailbox.deliver(msg);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable server message");
                    break 'pump;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = read.read(&mut chunk) => match result {
                Ok(0) => break,
                Ok(n) => frames.extend(&chunk[..n]),
                Err(e) => {
                    tracing::debug!(error = %e, "socket read failed");
                    break;
                }
            },
        }
    }

    mailbox.close();
}
