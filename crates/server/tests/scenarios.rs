//! End-to-end scenarios over real TCP, driving the server with the real
//! client engine.

use std::sync::Arc;

use tempfile::TempDir;

use leo_client::{Client, ClientConfig, ClientError};
use leo_protocol::messages::{EntryKind, ErrorCode};
use leo_server::{Credentials, Server, ServerConfig};

struct TestServer {
    server: Arc<Server>,
    handle: tokio::task::JoinHandle<()>,
    port: u16,
    _root: TempDir,
}

impl TestServer {
    async fn start() -> Self {
        let root = TempDir::new().unwrap();
        let mut config = ServerConfig::new(Credentials::new("user", "pass"), root.path());
        config.port = 0;

        let server = Server::new(config).unwrap();
        let handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await.unwrap() })
        };

        let addr = loop {
            if let Some(addr) = server.local_addr().await {
                break addr;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        };

        Self {
            server,
            handle,
            port: addr.port(),
            _root: root,
        }
    }

    async fn client(&self) -> Client {
        let config = ClientConfig {
            port: self.port,
            ..ClientConfig::default()
        };
        Client::connect(&config).await.unwrap()
    }

    async fn stop(self) {
        self.server.shutdown();
        self.handle.await.unwrap();
    }
}

async fn authed_client(server: &TestServer) -> Client {
    let mut client = server.client().await;
    client.auth("user", "pass").await.unwrap();
    client
}

#[tokio::test]
async fn s1_happy_path_put_list_get_bye() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    let workdir = TempDir::new().unwrap();
    let local = workdir.path().join("x");
    tokio::fs::write(&local, "hello leo").await.unwrap();

    client.put(&local, "remote/file.txt").await.unwrap();

    let items = client.list("remote").await.unwrap();
    assert!(items.iter().any(|i| {
        i.name == "file.txt" && i.kind == EntryKind::File && i.size == Some(9)
    }));

    let fetched = workdir.path().join("fetched/file.txt");
    client.get("remote/file.txt", &fetched).await.unwrap();
    assert_eq!(tokio::fs::read(&fetched).await.unwrap(), b"hello leo");

    client.bye().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn s2_bad_credentials_then_retry() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    match client.auth("user", "wrong").await {
        Err(ClientError::Server { code, .. }) => {
            assert_eq!(code, ErrorCode::AuthInvalidCredentials);
        }
        other => panic!("expected AUTH_INVALID_CREDENTIALS, got {other:?}"),
    }

    // Same connection, second attempt.
    client.auth("user", "pass").await.unwrap();

    client.bye().await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn s3_path_traversal_on_del() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    match client.del("../evil.txt").await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, ErrorCode::InvalidPath),
        other => panic!("expected INVALID_PATH, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn s4_del_missing_file() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    match client.del("missing.txt").await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, ErrorCode::FileNotFound),
        other => panic!("expected FILE_NOT_FOUND, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn s5_get_missing_file() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    match client.get_bytes("absent.txt").await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, ErrorCode::FileNotFound),
        other => panic!("expected FILE_NOT_FOUND, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn s6_info_advertises_capabilities() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    let info = client.info().await.unwrap();
    assert_eq!(info.protocol_version, 1);
    assert!(info.capabilities.iter().any(|c| c == "DEL"));

    server.stop().await;
}

#[tokio::test]
async fn put_get_roundtrip_across_chunk_boundaries() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    let workdir = TempDir::new().unwrap();

    // Empty, single-byte, and a payload spanning several 64 KiB chunks.
    let cases: Vec<Vec<u8>> = vec![
        Vec::new(),
        vec![0x42],
        (0..200_000u32).map(|i| (i % 251) as u8).collect(),
    ];

    for (i, payload) in cases.iter().enumerate() {
        let local = workdir.path().join(format!("case-{i}"));
        tokio::fs::write(&local, payload).await.unwrap();

        let remote = format!("roundtrip/case-{i}.bin");
        client.put(&local, &remote).await.unwrap();

        let fetched = client.get_bytes(&remote).await.unwrap();
        assert_eq!(&fetched, payload, "case {i} should round-trip");
    }

    server.stop().await;
}

#[tokio::test]
async fn unauthenticated_commands_are_refused() {
    let server = TestServer::start().await;
    let mut client = server.client().await;

    match client.list("").await {
        Err(ClientError::Server { code, .. }) => assert_eq!(code, ErrorCode::Unauthorized),
        other => panic!("expected UNAUTHORIZED, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let server = TestServer::start().await;

    let mut a = authed_client(&server).await;
    let mut b = server.client().await;

    // Session B is unauthenticated and must stay that way regardless of A.
    assert!(matches!(
        b.list("").await,
        Err(ClientError::Server {
            code: ErrorCode::Unauthorized,
            ..
        })
    ));
    assert!(a.list("").await.is_ok());

    server.stop().await;
}

#[tokio::test]
async fn second_put_overwrites_remote_file() {
    let server = TestServer::start().await;
    let mut client = authed_client(&server).await;

    let workdir = TempDir::new().unwrap();
    let first = workdir.path().join("first");
    let second = workdir.path().join("second");
    tokio::fs::write(&first, "a longer original payload").await.unwrap();
    tokio::fs::write(&second, "short").await.unwrap();

    client.put(&first, "doc.txt").await.unwrap();
    client.put(&second, "doc.txt").await.unwrap();

    assert_eq!(client.get_bytes("doc.txt").await.unwrap(), b"short");

    server.stop().await;
}
