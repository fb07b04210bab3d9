use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use snare::{HostKey, MemorySink, render_banner};

use super::common::{TestClient, TestServer, fast_builder};

#[tokio::test]
async fn test_password_is_recorded_then_rejected() {
    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;

    let mut client = TestClient::connect(server.addr()).await;
    let accepted = client.try_password("root", "hunter2").await;
    assert!(!accepted, "decoy must never accept a password");

    let attempts = sink.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].username, "root");
    assert_eq!(attempts[0].password, "hunter2");
    assert_eq!(attempts[0].remote_addr, client.local_addr.to_string());

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_banner_is_rendered_from_template() {
    let server = TestServer::start_with_sink(MemorySink::new()).await;

    let mut client = TestClient::connect(server.addr()).await;
    assert!(!client.try_password("admin", "admin").await);

    let observed = client.recorder.snapshot();
    assert_eq!(
        observed.banner.as_deref(),
        Some(render_banner("Ubuntu-4ubuntu0.5").as_str())
    );

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_repeated_attempts_on_one_connection() {
    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;

    let mut client = TestClient::connect(server.addr()).await;
    for password in ["123456", "password", "root"] {
        assert!(!client.try_password("root", password).await);
    }

    let passwords: Vec<_> = sink.attempts().into_iter().map(|a| a.password).collect();
    assert_eq!(passwords, vec!["123456", "password", "root"]);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_credentials_are_byte_exact() {
    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;

    let user = " ops user\t";
    let password = "p\"a\\s s\nw\u{1b}[0m\u{00e9}\u{1f511}";

    let mut client = TestClient::connect(server.addr()).await;
    assert!(!client.try_password(user, password).await);

    let attempts = sink.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].username, user);
    assert_eq!(attempts[0].password, password);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_public_key_is_refused_without_recording() {
    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;

    let mut client = TestClient::connect(server.addr()).await;
    let key = HostKey::embedded().expect("embedded key").into_parts().0;
    let accepted = tokio::time::timeout(
        Duration::from_secs(10),
        client.handle.authenticate_publickey("root", Arc::new(key)),
    )
    .await
    .expect("publickey auth timed out")
    .expect("publickey auth");

    assert!(!accepted);
    assert!(sink.is_empty());

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_rejection_waits_at_least_minimum_delay() {
    let sink = MemorySink::new();
    let server = TestServer::start(
        fast_builder()
            .rejection_delay(Duration::from_millis(150), Duration::ZERO)
            .sink(sink.clone()),
    )
    .await;

    let mut client = TestClient::connect(server.addr()).await;
    let start = Instant::now();
    assert!(!client.try_password("root", "toor").await);
    let elapsed = start.elapsed();

    assert!(
        elapsed >= Duration::from_millis(150),
        "rejected after {elapsed:?}"
    );
    assert_eq!(sink.len(), 1);

    client.close().await;
    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_are_all_recorded() {
    const CLIENTS: usize = 50;

    let sink = MemorySink::new();
    let server = TestServer::start_with_sink(sink.clone()).await;
    let addr = server.addr();

    let results = join_all((0..CLIENTS).map(|i| async move {
        let mut client = TestClient::connect(addr).await;
        let user = format!("user-{i}");
        assert!(!client.try_password(&user, &format!("pw-{i}")).await);
        let local = client.local_addr.to_string();
        client.close().await;
        (user, local)
    }))
    .await;

    let attempts = sink.attempts();
    assert_eq!(attempts.len(), CLIENTS);
    for (user, local) in results {
        let attempt = attempts
            .iter()
            .find(|a| a.username == user)
            .unwrap_or_else(|| panic!("no attempt recorded for {user}"));
        assert_eq!(attempt.remote_addr, local);
        assert_eq!(attempt.password, user.replace("user", "pw"));
    }

    server.stop().await;
}

#[tokio::test]
async fn test_connection_closes_after_attempt_limit() {
    let sink = MemorySink::new();
    let server = TestServer::start(fast_builder().max_auth_attempts(2).sink(sink.clone())).await;

    let mut client = TestClient::connect(server.addr()).await;
    assert!(!client.try_password("root", "first").await);
    assert!(!client.try_password("root", "second").await);

    let third = client.password_attempt("root", "third").await;
    assert!(third.is_err(), "third attempt should end the connection: {third:?}");

    let passwords: Vec<_> = sink.attempts().into_iter().map(|a| a.password).collect();
    assert_eq!(passwords, vec!["first", "second", "third"]);

    server.stop().await;
}
