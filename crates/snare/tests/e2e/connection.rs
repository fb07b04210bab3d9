use std::time::Duration;

use snare::{HostKeySource, MemorySink, ServerBuilder};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;

use super::common::{DEFAULT_TIMEOUT, TestClient, TestServer, fast_builder};

async fn read_first_line(stream: &mut TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    tokio::time::timeout(DEFAULT_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("identification timed out")
        .expect("read identification");
    line
}

#[tokio::test]
async fn test_identification_line_on_the_wire() {
    let server = TestServer::start_with_sink(MemorySink::new()).await;

    let mut stream = TcpStream::connect(server.addr()).await.expect("connect");
    let line = read_first_line(&mut stream).await;
    assert_eq!(line, "SSH-2.0-OpenSSH_8.2p1 Ubuntu-4ubuntu0.5\r\n");

    server.stop().await;
}

#[tokio::test]
async fn test_custom_identification_on_the_wire() {
    let server = TestServer::start(
        fast_builder()
            .server_version("OpenSSH_7.4")
            .banner("Debian-10+deb9u7")
            .sink(MemorySink::new()),
    )
    .await;

    let mut stream = TcpStream::connect(server.addr()).await.expect("connect");
    let line = read_first_line(&mut stream).await;
    assert_eq!(line, "SSH-2.0-OpenSSH_7.4 Debian-10+deb9u7\r\n");

    server.stop().await;
}

#[tokio::test]
async fn test_client_sees_advertised_fingerprint() {
    let server = TestServer::start_with_sink(MemorySink::new()).await;

    let client = TestClient::connect(server.addr()).await;
    let observed = client.recorder.snapshot();
    assert_eq!(
        observed.server_fingerprint.as_deref(),
        Some(server.fingerprint())
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_garbage_client_does_not_stop_server() {
    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;

    {
        use tokio::io::AsyncWriteExt;
        let mut stream = TcpStream::connect(server.addr()).await.expect("connect");
        let _ = read_first_line(&mut stream).await;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: example\r\n\r\n")
            .await
            .expect("write garbage");
    }

    let mut client = TestClient::connect(server.addr()).await;
    assert!(!client.try_password("root", "root").await);
    assert_eq!(sink.len(), 1);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_connection_limit_drops_excess_connections() {
    let server = TestServer::start(fast_builder().max_connections(1).sink(MemorySink::new())).await;

    let mut first = TcpStream::connect(server.addr()).await.expect("connect");
    let line = read_first_line(&mut first).await;
    assert!(line.starts_with("SSH-2.0-"));

    let mut second = TcpStream::connect(server.addr()).await.expect("connect");
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(DEFAULT_TIMEOUT, second.read(&mut buf))
        .await
        .expect("second connection should be closed promptly")
        .unwrap_or(0);
    assert_eq!(n, 0, "over-limit connection received data");

    drop(first);
    server.stop().await;
}

#[tokio::test]
async fn test_listen_bind_failure_is_reported() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = occupied.local_addr().expect("local addr");

    let server = ServerBuilder::new()
        .address(addr.to_string())
        .host_key(HostKeySource::Embedded)
        .sink(MemorySink::new())
        .build()
        .expect("build");

    let err = server.bind().await.unwrap_err();
    assert!(matches!(err, snare::Error::Bind { .. }));

    let err = tokio::time::timeout(Duration::from_secs(5), server.listen())
        .await
        .expect("listen returned promptly")
        .unwrap_err();
    assert!(matches!(err, snare::Error::Bind { .. }));
}

#[test]
fn test_missing_key_file_fails_build() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = ServerBuilder::new()
        .host_key(HostKeySource::Path(dir.path().join("absent_key")))
        .sink(MemorySink::new())
        .build()
        .unwrap_err();
    assert!(matches!(err, snare::Error::KeyRead { .. }));
}
