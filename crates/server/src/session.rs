//! Per-connection session actor.
//!
//! One instance per accepted socket, driven serially: read bytes, peel one
//! message, dispatch, write replies, repeat. The session walks
//! `AwaitHello → AwaitAuth → Ready → Closed`; the first state speaks
//! newline-terminated JSON, everything after key derivation is
//! length-prefixed AES-GCM frames.
//!
//! Failure policy: anything that happens before the peer proved knowledge
//! of the session keys (bad hello, AEAD failure, oversized frame) tears the
//! socket down without a reply. After that, schema problems get a typed
//! `ERROR` and the session survives, except unreadable JSON inside a valid
//! frame, which is reported once and then fatal.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use zeroize::Zeroize;

use leo_crypto::{self as crypto, Keypair, SessionKeys};
use leo_protocol::consts::{CIPHER, HANDSHAKE_TIMEOUT, KEX, PROTOCOL_VERSION, TRANSFER_CHUNK_SIZE};
use leo_protocol::framing::{encode_frame, FrameBuffer, LineBuffer};
use leo_protocol::messages::{
    decode_message, DecodeError, EntryKind, ErrorCode, ListItem, Message,
};
use leo_storage::{Storage, StorageError};

use crate::config::Credentials;
use crate::info::ServerInfo;

/// Read granularity for the socket loop.
const READ_BUF_SIZE: usize = 8 * 1024;

/// Infrastructure failures that abort a session.
///
/// Protocol violations are not errors at this level: the actor closes the
/// socket and returns `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("crypto failure: {0}")]
    Crypto(#[from] leo_crypto::CryptoError),
}

/// In-flight upload registered by `PUT_BEGIN`.
#[derive(Debug)]
struct Upload {
    declared_size: u64,
    received: u64,
}

/// Post-handshake protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitAuth,
    Ready,
}

/// What the dispatcher wants done with the connection afterwards.
enum Flow {
    Continue,
    Close,
    /// Half-close the send side first (`BYE`).
    CloseSend,
}

/// Runs one session to completion. Consumes the socket.
pub(crate) async fn run<S>(
    stream: S,
    peer: SocketAddr,
    storage: Arc<Storage>,
    info: Arc<ServerInfo>,
    credentials: Arc<Credentials>,
    cancel: CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = Session {
        stream,
        peer,
        storage,
        info,
        credentials,
        cancel,
    };
    session.drive().await
}

struct Session<S> {
    stream: S,
    peer: SocketAddr,
    storage: Arc<Storage>,
    info: Arc<ServerInfo>,
    credentials: Arc<Credentials>,
    cancel: CancellationToken,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    async fn drive(&mut self) -> Result<(), SessionError> {
        // AwaitHello, bounded by the handshake timer from accept.
        let hello = match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.read_hello()).await {
            Ok(Ok(Some(hello))) => hello,
            Ok(Ok(None)) => {
                tracing::info!(peer = %self.peer, "handshake rejected, closing silently");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::info!(peer = %self.peer, "handshake timeout");
                return Ok(());
            }
        };
        let (client_public, leftover) = hello;

        let keypair = Keypair::generate();
        let session_id = crypto::generate_session_id();
        let mut shared = keypair.diffie_hellman(&client_public);
        let keys = SessionKeys::derive(&shared, &session_id)?;
        shared.zeroize();

        let reply = Message::ServerHello {
            ok: true,
            version: PROTOCOL_VERSION,
            cipher: CIPHER.to_owned(),
            kex: KEX.to_owned(),
            server_public_key: keypair.public_base64(),
            session_id: session_id.clone(),
            error: None,
        };
        let mut line = serde_json::to_vec(&reply)?;
        line.push(b'\n');
        self.stream.write_all(&line).await?;

        tracing::info!(peer = %self.peer, session = %session_id, "handshake complete");

        // AwaitAuth / Ready: encrypted frames from here on.
        let mut frames = FrameBuffer::new();
        frames.extend(&leftover);
        let mut phase = Phase::AwaitAuth;
        let mut uploads: HashMap<String, Upload> = HashMap::new();
        let mut chunk = [0u8; READ_BUF_SIZE];

        loop {
            loop {
                let frame = match frames.next_frame() {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::info!(peer = %self.peer, error = %e, "framing violation, closing");
                        return Ok(());
                    }
                };

                let plaintext = match crypto::open(&keys.c2s, &frame) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        tracing::info!(peer = %self.peer, error = %e, "decryption failure, closing");
                        return Ok(());
                    }
                };

                match self
                    .handle_plaintext(&plaintext, &keys, &mut phase, &mut uploads)
                    .await?
                {
                    Flow::Continue => {}
                    Flow::Close => return Ok(()),
                    Flow::CloseSend => {
                        let _ = self.stream.shutdown().await;
                        return Ok(());
                    }
                }
            }

            let n = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                read = self.stream.read(&mut chunk) => read?,
            };
            if n == 0 {
                tracing::debug!(peer = %self.peer, "peer closed the connection");
                return Ok(());
            }
            frames.extend(&chunk[..n]);
        }
    }

    /// Reads and validates the `CLIENT_HELLO` line.
    ///
    /// Returns the peer's raw public key and any bytes that followed the
    /// newline, or `None` for any violation (the socket is then closed
    /// without a reply, since the peer has no keys to read one with).
    async fn read_hello(&mut self) -> Result<Option<([u8; 32], Vec<u8>)>, SessionError> {
        let mut line_buf = LineBuffer::new();
        let mut chunk = [0u8; READ_BUF_SIZE];

        let (line, leftover) = loop {
            let n = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                read = self.stream.read(&mut chunk) => read?,
            };
            if n == 0 {
                return Ok(None);
            }
            match line_buf.push(&chunk[..n]) {
                Ok(Some(split)) => break split,
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(peer = %self.peer, error = %e, "unusable handshake line");
                    return Ok(None);
                }
            }
        };

        let hello: Message = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(peer = %self.peer, error = %e, "hello is not valid JSON");
                return Ok(None);
            }
        };

        let Message::ClientHello {
            version,
            cipher,
            kex,
            client_public_key,
        } = hello
        else {
            tracing::debug!(peer = %self.peer, "first line is not CLIENT_HELLO");
            return Ok(None);
        };

        if version != PROTOCOL_VERSION || cipher != CIPHER || kex != KEX {
            tracing::debug!(peer = %self.peer, version, %cipher, %kex, "unsupported hello parameters");
            return Ok(None);
        }
        let Ok(client_public) = crypto::decode_public_key(&client_public_key) else {
            tracing::debug!(peer = %self.peer, "unusable client public key");
            return Ok(None);
        };

        Ok(Some((client_public, leftover)))
    }

    async fn handle_plaintext(
        &mut self,
        plaintext: &[u8],
        keys: &SessionKeys,
        phase: &mut Phase,
        uploads: &mut HashMap<String, Upload>,
    ) -> Result<Flow, SessionError> {
        let msg = match decode_message(plaintext) {
            Ok(msg) => msg,
            Err(DecodeError::Unreadable(e)) => {
                // A frame that decrypted but holds no JSON is a protocol
                // break: report once, then drop the connection.
                tracing::info!(peer = %self.peer, error = %e, "unreadable frame payload");
                self.send(keys, &Message::error(ErrorCode::InvalidMessage, "Message illisible"))
                    .await?;
                return Ok(Flow::Close);
            }
            Err(DecodeError::MissingType) => {
                self.send(keys, &Message::error(ErrorCode::InvalidMessage, "Message illisible"))
                    .await?;
                return Ok(Flow::Continue);
            }
            Err(DecodeError::UnknownType(t)) => {
                self.send(
                    keys,
                    &Message::error(ErrorCode::InvalidCommand, format!("Commande inconnue: {t}")),
                )
                .await?;
                return Ok(Flow::Continue);
            }
            Err(DecodeError::Schema { msg_type, .. }) => {
                self.send(
                    keys,
                    &Message::error(
                        ErrorCode::InvalidMessage,
                        format!("Champs invalides pour {msg_type}"),
                    ),
                )
                .await?;
                return Ok(Flow::Continue);
            }
        };

        tracing::debug!(peer = %self.peer, msg = msg.type_name(), "dispatch");
        match msg {
            Message::Bye => Ok(Flow::CloseSend),
            Message::Auth { username, password } => {
                self.handle_auth(keys, phase, &username, &password).await
            }
            _ if *phase == Phase::AwaitAuth => {
                self.send(
                    keys,
                    &Message::error(ErrorCode::Unauthorized, "Authentification requise"),
                )
                .await?;
                Ok(Flow::Continue)
            }
            Message::PutBegin { path, size } => {
                self.handle_put_begin(keys, uploads, path, size).await
            }
            Message::PutChunk { path, offset, data } => {
                self.handle_put_chunk(keys, uploads, path, offset, data).await
            }
            Message::PutEnd { path } => self.handle_put_end(keys, uploads, path).await,
            Message::GetBegin { path } => self.handle_get(keys, path).await,
            Message::List { path } => self.handle_list(keys, path).await,
            Message::Del { path } => self.handle_del(keys, path).await,
            Message::Info => self.handle_info(keys).await,
            other => {
                self.send(
                    keys,
                    &Message::error(
                        ErrorCode::InvalidCommand,
                        format!("Commande invalide: {}", other.type_name()),
                    ),
                )
                .await?;
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_auth(
        &mut self,
        keys: &SessionKeys,
        phase: &mut Phase,
        username: &str,
        password: &str,
    ) -> Result<Flow, SessionError> {
        if self.credentials.matches(username, password) {
            *phase = Phase::Ready;
            tracing::info!(peer = %self.peer, username, "client authenticated");
            self.send(keys, &Message::AuthOk).await?;
        } else {
            tracing::warn!(peer = %self.peer, username, "invalid credentials");
            self.send(
                keys,
                &Message::AuthError {
                    error: "Identifiants invalides".to_owned(),
                    error_code: ErrorCode::AuthInvalidCredentials,
                    message: Some("Identifiants invalides".to_owned()),
                    details: None,
                },
            )
            .await?;
        }
        Ok(Flow::Continue)
    }

    async fn handle_put_begin(
        &mut self,
        keys: &SessionKeys,
        uploads: &mut HashMap<String, Upload>,
        path: String,
        size: u64,
    ) -> Result<Flow, SessionError> {
        if let Some(max) = self.info.max_upload_size {
            if size > max {
                self.send(
                    keys,
                    &Message::error(
                        ErrorCode::IoError,
                        format!("taille déclarée {size} au-delà de la limite {max}"),
                    ),
                )
                .await?;
                return Ok(Flow::Continue);
            }
        }

        // Create/truncate the target up front so an empty upload still
        // materializes a file. A failure here replies with a typed error
        // and leaves no upload state behind.
        match self.storage.write_whole(&path, &[]) {
            Ok(()) => {
                tracing::debug!(peer = %self.peer, path, size, "upload started");
                uploads.insert(
                    path,
                    Upload {
                        declared_size: size,
                        received: 0,
                    },
                );
            }
            Err(e) => self.send_storage_error(keys, &e).await?,
        }
        Ok(Flow::Continue)
    }

    async fn handle_put_chunk(
        &mut self,
        keys: &SessionKeys,
        uploads: &mut HashMap<String, Upload>,
        path: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Flow, SessionError> {
        let Some(upload) = uploads.get_mut(&path) else {
            self.send(
                keys,
                &Message::error(ErrorCode::UploadNotInitialized, "Transfert non initialisé"),
            )
            .await?;
            return Ok(Flow::Continue);
        };

        match self.storage.write_chunk(&path, &data, offset) {
            Ok(()) => upload.received += data.len() as u64,
            Err(e) => self.send_storage_error(keys, &e).await?,
        }
        Ok(Flow::Continue)
    }

    async fn handle_put_end(
        &mut self,
        keys: &SessionKeys,
        uploads: &mut HashMap<String, Upload>,
        path: String,
    ) -> Result<Flow, SessionError> {
        if let Some(upload) = uploads.remove(&path) {
            tracing::info!(
                peer = %self.peer,
                path,
                declared = upload.declared_size,
                received = upload.received,
                "upload finished"
            );
        }
        self.send(keys, &Message::PutOk { path }).await?;
        Ok(Flow::Continue)
    }

    async fn handle_get(&mut self, keys: &SessionKeys, path: String) -> Result<Flow, SessionError> {
        let size = match self.storage.file_size(&path) {
            Ok(size) => size,
            Err(e) => {
                self.send_storage_error(keys, &e).await?;
                return Ok(Flow::Continue);
            }
        };

        self.send(
            keys,
            &Message::GetMeta {
                path: path.clone(),
                size,
            },
        )
        .await?;

        let mut offset = 0u64;
        while offset < size {
            let data = match self.storage.read_chunk(&path, offset, TRANSFER_CHUNK_SIZE) {
                Ok(data) => data,
                Err(e) => {
                    // Abort the stream: the error replaces GET_END.
                    self.send_storage_error(keys, &e).await?;
                    return Ok(Flow::Continue);
                }
            };
            if data.is_empty() {
                // File shrank under us; the client will notice the size gap.
                break;
            }
            let len = data.len() as u64;
            self.send(
                keys,
                &Message::GetChunk {
                    path: path.clone(),
                    offset,
                    data,
                },
            )
            .await?;
            offset += len;
        }

        self.send(keys, &Message::GetEnd { path }).await?;
        Ok(Flow::Continue)
    }

    async fn handle_list(&mut self, keys: &SessionKeys, path: String) -> Result<Flow, SessionError> {
        match self.storage.list(&path) {
            Ok(entries) => {
                let items = entries
                    .into_iter()
                    .map(|e| ListItem {
                        name: e.name,
                        kind: if e.is_dir { EntryKind::Dir } else { EntryKind::File },
                        size: e.size,
                    })
                    .collect();
                self.send(keys, &Message::ListResult { path, items }).await?;
            }
            Err(e) => self.send_storage_error(keys, &e).await?,
        }
        Ok(Flow::Continue)
    }

    async fn handle_del(&mut self, keys: &SessionKeys, path: String) -> Result<Flow, SessionError> {
        match self.storage.delete_file(&path) {
            Ok(()) => self.send(keys, &Message::DelOk { path }).await?,
            Err(e) => {
                tracing::warn!(peer = %self.peer, path, error = %e, "delete failed");
                self.send(keys, &Message::del_error(path, storage_error_code(&e), e.to_string()))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_info(&mut self, keys: &SessionKeys) -> Result<Flow, SessionError> {
        let info = self.info.as_ref();
        self.send(
            keys,
            &Message::InfoResult {
                version: info.version.clone(),
                protocol_version: info.protocol_version,
                capabilities: info.capabilities.clone(),
                storage_root: info.storage_root.clone(),
                max_upload_size: info.max_upload_size,
            },
        )
        .await?;
        Ok(Flow::Continue)
    }

    /// Encrypts and writes one message on the server-to-client key.
    async fn send(&mut self, keys: &SessionKeys, msg: &Message) -> Result<(), SessionError> {
        let json = serde_json::to_vec(msg)?;
        let blob = crypto::seal(&keys.s2c, &json)?;
        self.stream.write_all(&encode_frame(&blob)).await?;
        Ok(())
    }

    async fn send_storage_error(
        &mut self,
        keys: &SessionKeys,
        err: &StorageError,
    ) -> Result<(), SessionError> {
        tracing::warn!(peer = %self.peer, error = %err, "storage operation failed");
        self.send(keys, &Message::error(storage_error_code(err), err.to_string()))
            .await
    }
}

/// Maps storage failures to the wire error taxonomy.
fn storage_error_code(err: &StorageError) -> ErrorCode {
    match err {
        StorageError::InvalidPath(_) => ErrorCode::InvalidPath,
        StorageError::NotFound(_) => ErrorCode::FileNotFound,
        StorageError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        StorageError::NotAFile(_) => ErrorCode::NotAFile,
        StorageError::Io(_) => ErrorCode::IoError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leo_protocol::consts::MAX_FRAME_SIZE;
    use tempfile::TempDir;
    use tokio::io::DuplexStream;

    use crate::config::{Credentials, ServerConfig};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    /// Spawns a session over an in-memory duplex; returns the client end.
    fn spawn_session(tmp: &TempDir) -> DuplexStream {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let storage = Arc::new(Storage::new(tmp.path()).unwrap());
        let config = ServerConfig::new(Credentials::new("user", "pass"), tmp.path());
        let info = Arc::new(ServerInfo::new(&config, storage.root()));
        let credentials = Arc::new(config.credentials.clone());

        tokio::spawn(run(
            server_io,
            peer(),
            storage,
            info,
            credentials,
            CancellationToken::new(),
        ));
        client_io
    }

    /// Client half of the handshake, built straight on the primitives.
    async fn client_handshake(io: &mut DuplexStream) -> (SessionKeys, FrameBuffer) {
        let keypair = Keypair::generate();
        let hello = Message::ClientHello {
            version: PROTOCOL_VERSION,
            cipher: CIPHER.to_owned(),
            kex: KEX.to_owned(),
            client_public_key: keypair.public_base64(),
        };
        let mut line = serde_json::to_vec(&hello).unwrap();
        line.push(b'\n');
        io.write_all(&line).await.unwrap();

        let reply = read_line(io).await.expect("server hello expected");
        let Message::ServerHello {
            ok,
            server_public_key,
            session_id,
            ..
        } = serde_json::from_str(&reply).unwrap()
        else {
            panic!("expected SERVER_HELLO, got {reply}");
        };
        assert!(ok);
        assert_eq!(session_id.len(), 16);

        let server_public = crypto::decode_public_key(&server_public_key).unwrap();
        let shared = keypair.diffie_hellman(&server_public);
        let keys = SessionKeys::derive(&shared, &session_id).unwrap();
        (keys, FrameBuffer::new())
    }

    async fn read_line(io: &mut DuplexStream) -> Option<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match io.read(&mut byte).await {
                Ok(0) => return None,
                Ok(_) if byte[0] == b'\n' => return Some(String::from_utf8(line).unwrap()),
                Ok(_) => line.push(byte[0]),
                Err(_) => return None,
            }
        }
    }

    async fn send_msg(io: &mut DuplexStream, keys: &SessionKeys, msg: &Message) {
        let blob = crypto::seal(&keys.c2s, &serde_json::to_vec(msg).unwrap()).unwrap();
        io.write_all(&encode_frame(&blob)).await.unwrap();
    }

    async fn recv_msg(
        io: &mut DuplexStream,
        keys: &SessionKeys,
        frames: &mut FrameBuffer,
    ) -> Option<Message> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(frame) = frames.next_frame().unwrap() {
                let plaintext = crypto::open(&keys.s2c, &frame).unwrap();
                return Some(decode_message(&plaintext).unwrap());
            }
            match io.read(&mut chunk).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => frames.extend(&chunk[..n]),
            }
        }
    }

    async fn authenticate(io: &mut DuplexStream, keys: &SessionKeys, frames: &mut FrameBuffer) {
        send_msg(
            io,
            keys,
            &Message::Auth {
                username: "user".into(),
                password: "pass".into(),
            },
        )
        .await;
        assert_eq!(recv_msg(io, keys, frames).await.unwrap(), Message::AuthOk);
    }

    async fn expect_eof(io: &mut DuplexStream) {
        let mut chunk = [0u8; 64];
        loop {
            match io.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(_) => panic!("expected silent close, got bytes"),
            }
        }
    }

    #[tokio::test]
    async fn wrong_cipher_in_hello_closes_silently() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);

        let hello = Message::ClientHello {
            version: PROTOCOL_VERSION,
            cipher: "ROT13".to_owned(),
            kex: KEX.to_owned(),
            client_public_key: Keypair::generate().public_base64(),
        };
        let mut line = serde_json::to_vec(&hello).unwrap();
        line.push(b'\n');
        io.write_all(&line).await.unwrap();

        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn non_json_hello_closes_silently() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);

        io.write_all(b"GET / HTTP/1.1\n").await.unwrap();
        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn empty_public_key_closes_silently() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);

        let hello = Message::ClientHello {
            version: PROTOCOL_VERSION,
            cipher: CIPHER.to_owned(),
            kex: KEX.to_owned(),
            client_public_key: String::new(),
        };
        let mut line = serde_json::to_vec(&hello).unwrap();
        line.push(b'\n');
        io.write_all(&line).await.unwrap();

        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn handshake_timeout_closes_the_socket() {
        tokio::time::pause();
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);

        // Never send a hello; the 10 s timer should fire.
        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn auth_retry_after_bad_credentials() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;

        send_msg(
            &mut io,
            &keys,
            &Message::Auth {
                username: "user".into(),
                password: "wrong".into(),
            },
        )
        .await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::AuthError { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::AuthInvalidCredentials);
            }
            other => panic!("expected AUTH_ERROR, got {}", other.type_name()),
        }

        // The session stayed open; a second attempt succeeds.
        authenticate(&mut io, &keys, &mut frames).await;
    }

    #[tokio::test]
    async fn commands_before_auth_are_unauthorized() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;

        send_msg(&mut io, &keys, &Message::List { path: String::new() }).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, message, .. } => {
                assert_eq!(error_code, ErrorCode::Unauthorized);
                assert_eq!(message, "Authentification requise");
            }
            other => panic!("expected ERROR, got {}", other.type_name()),
        }

        // State did not change: auth still possible.
        authenticate(&mut io, &keys, &mut frames).await;
    }

    #[tokio::test]
    async fn unknown_type_gets_invalid_command_and_session_survives() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        let blob = crypto::seal(&keys.c2s, br#"{"type":"TELEPORT"}"#).unwrap();
        io.write_all(&encode_frame(&blob)).await.unwrap();
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, .. } => assert_eq!(error_code, ErrorCode::InvalidCommand),
            other => panic!("expected ERROR, got {}", other.type_name()),
        }

        // Still alive.
        send_msg(&mut io, &keys, &Message::Info).await;
        assert!(matches!(
            recv_msg(&mut io, &keys, &mut frames).await.unwrap(),
            Message::InfoResult { .. }
        ));
    }

    #[tokio::test]
    async fn missing_field_gets_invalid_message_and_session_survives() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        let blob = crypto::seal(&keys.c2s, br#"{"type":"PUT_BEGIN","path":"x"}"#).unwrap();
        io.write_all(&encode_frame(&blob)).await.unwrap();
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, .. } => assert_eq!(error_code, ErrorCode::InvalidMessage),
            other => panic!("expected ERROR, got {}", other.type_name()),
        }

        send_msg(&mut io, &keys, &Message::Info).await;
        assert!(recv_msg(&mut io, &keys, &mut frames).await.is_some());
    }

    #[tokio::test]
    async fn unreadable_json_in_frame_reports_then_closes() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        let blob = crypto::seal(&keys.c2s, b"{definitely not json").unwrap();
        io.write_all(&encode_frame(&blob)).await.unwrap();

        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, message, .. } => {
                assert_eq!(error_code, ErrorCode::InvalidMessage);
                assert_eq!(message, "Message illisible");
            }
            other => panic!("expected ERROR, got {}", other.type_name()),
        }
        assert!(recv_msg(&mut io, &keys, &mut frames).await.is_none());
    }

    #[tokio::test]
    async fn tampered_frame_closes_without_reply() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, _frames) = client_handshake(&mut io).await;

        let mut blob = crypto::seal(&keys.c2s, br#"{"type":"INFO"}"#).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        io.write_all(&encode_frame(&blob)).await.unwrap();

        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn oversize_frame_closes_without_reply() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (_keys, _frames) = client_handshake(&mut io).await;

        let declared = (MAX_FRAME_SIZE as u32) + 1;
        io.write_all(&declared.to_be_bytes()).await.unwrap();

        expect_eof(&mut io).await;
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        let payload = b"hello leo".to_vec();
        send_msg(
            &mut io,
            &keys,
            &Message::PutBegin {
                path: "remote/file.txt".into(),
                size: payload.len() as u64,
            },
        )
        .await;
        send_msg(
            &mut io,
            &keys,
            &Message::PutChunk {
                path: "remote/file.txt".into(),
                offset: 0,
                data: payload.clone(),
            },
        )
        .await;
        send_msg(&mut io, &keys, &Message::PutEnd { path: "remote/file.txt".into() }).await;
        assert_eq!(
            recv_msg(&mut io, &keys, &mut frames).await.unwrap(),
            Message::PutOk {
                path: "remote/file.txt".into()
            }
        );

        send_msg(&mut io, &keys, &Message::GetBegin { path: "remote/file.txt".into() }).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::GetMeta { size, .. } => assert_eq!(size, payload.len() as u64),
            other => panic!("expected GET_META, got {}", other.type_name()),
        }
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::GetChunk { offset, data, .. } => {
                assert_eq!(offset, 0);
                assert_eq!(data, payload);
            }
            other => panic!("expected GET_CHUNK, got {}", other.type_name()),
        }
        assert_eq!(
            recv_msg(&mut io, &keys, &mut frames).await.unwrap(),
            Message::GetEnd {
                path: "remote/file.txt".into()
            }
        );
    }

    #[tokio::test]
    async fn put_chunk_without_begin_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        send_msg(
            &mut io,
            &keys,
            &Message::PutChunk {
                path: "orphan.bin".into(),
                offset: 0,
                data: vec![1, 2, 3],
            },
        )
        .await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::UploadNotInitialized);
            }
            other => panic!("expected ERROR, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn get_missing_file_yields_error_without_meta() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        send_msg(&mut io, &keys, &Message::GetBegin { path: "absent.txt".into() }).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::Error { error_code, .. } => assert_eq!(error_code, ErrorCode::FileNotFound),
            other => panic!("expected ERROR, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn del_traversal_and_missing_use_typed_del_error() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        send_msg(&mut io, &keys, &Message::Del { path: "../evil.txt".into() }).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::DelError { error_code, error, message, .. } => {
                assert_eq!(error_code, ErrorCode::InvalidPath);
                assert_eq!(error, message);
            }
            other => panic!("expected DEL_ERROR, got {}", other.type_name()),
        }

        send_msg(&mut io, &keys, &Message::Del { path: "missing.txt".into() }).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::DelError { error_code, .. } => {
                assert_eq!(error_code, ErrorCode::FileNotFound);
            }
            other => panic!("expected DEL_ERROR, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn info_reports_protocol_and_capabilities() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        send_msg(&mut io, &keys, &Message::Info).await;
        match recv_msg(&mut io, &keys, &mut frames).await.unwrap() {
            Message::InfoResult {
                protocol_version,
                capabilities,
                storage_root,
                ..
            } => {
                assert_eq!(protocol_version, 1);
                assert!(capabilities.iter().any(|c| c == "DEL"));
                assert!(storage_root.is_some());
            }
            other => panic!("expected INFO_RESULT, got {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn bye_half_closes_and_terminates() {
        let tmp = TempDir::new().unwrap();
        let mut io = spawn_session(&tmp);
        let (keys, mut frames) = client_handshake(&mut io).await;
        authenticate(&mut io, &keys, &mut frames).await;

        send_msg(&mut io, &keys, &Message::Bye).await;
        assert!(recv_msg(&mut io, &keys, &mut frames).await.is_none());
    }
}
