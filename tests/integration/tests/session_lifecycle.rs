//! End-to-end session tests over real WebSockets.
//!
//! Each test binds a [`FakeGateway`] on 127.0.0.1 and drives the engine
//! through the handshake, dispatch, disconnect and resume paths.

use discorator_core::Token;
use discorator_gateway::{ConnectionStatus, EventKind, Gateway, GatewayError};
use discorator_integration_tests::{FakeGateway, STEP_TIMEOUT};
use serde_json::json;
use std::time::Duration;

fn gateway_for(server: &FakeGateway) -> Gateway {
    Gateway::builder(Token::new("Bot integration"))
        .entry_url(server.entry_url())
        .handshake_timeout(STEP_TIMEOUT)
        .build()
        .unwrap()
}

async fn wait_for_status(gateway: &Gateway, expected: ConnectionStatus) {
    let mut status = gateway.watch_status();
    tokio::time::timeout(STEP_TIMEOUT, status.wait_for(|s| *s == expected))
        .await
        .expect("status never reached")
        .unwrap();
}

#[tokio::test]
async fn test_identify_dispatch_and_resume_after_close() {
    let server = FakeGateway::bind().await;
    let gateway = gateway_for(&server);

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut first = server.accept().await;
    assert_eq!(first.target, "/?v=10&encoding=json");
    first.hello(45_000).await;

    let identify = first.recv_op(2).await;
    assert_eq!(identify["d"]["token"], "Bot integration");
    assert_eq!(identify["d"]["intents"], 37376);

    first.ready(1, "session-1", &server.resume_url()).await;
    connecting.await.unwrap().unwrap();
    assert_eq!(gateway.session_id().as_deref(), Some("session-1"));
    assert_eq!(gateway.status(), ConnectionStatus::Connected);

    let mut events = gateway.subscribe();
    first
        .dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}))
        .await;
    let event = tokio::time::timeout(STEP_TIMEOUT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, EventKind::MessageCreate);
    assert_eq!(event.sequence, 2);
    assert_eq!(event.payload.as_raw().unwrap()["content"], "hi");

    // Remote drops the session with a resumable code
    first.close(4009).await;

    let mut second = server.accept().await;
    assert_eq!(second.target, "/resume?v=10&encoding=json");
    second.hello(45_000).await;

    let resume = second.recv_op(6).await;
    assert_eq!(resume["d"]["token"], "Bot integration");
    assert_eq!(resume["d"]["session_id"], "session-1");
    assert_eq!(resume["d"]["seq"], 2);

    second.dispatch("RESUMED", 3, json!({})).await;
    wait_for_status(&gateway, ConnectionStatus::Connected).await;
    assert_eq!(gateway.sequence(), Some(3));
    assert!(gateway.is_alive());

    gateway.close(true).await;
    assert_eq!(second.recv_close().await, Some(1000));
    assert_eq!(gateway.status(), ConnectionStatus::Closed);
    assert!(gateway.session_id().is_none());
}

#[tokio::test]
async fn test_authentication_failure_rejects_connect() {
    let server = FakeGateway::bind().await;
    let gateway = gateway_for(&server);

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut socket = server.accept().await;
    socket.hello(45_000).await;
    socket.recv_op(2).await;
    socket.close(4004).await;

    let err = connecting.await.unwrap().unwrap_err();
    assert!(err.is_fatal(), "unexpected error {:?}", err);
    assert!(!gateway.is_alive());
}

#[tokio::test]
async fn test_invalid_session_identifies_again_at_entry() {
    let server = FakeGateway::bind().await;
    let gateway = gateway_for(&server);

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut first = server.accept().await;
    first.hello(45_000).await;
    first.recv_op(2).await;
    first.ready(1, "session-1", &server.resume_url()).await;
    connecting.await.unwrap().unwrap();

    first.send(json!({"op": 9, "d": false})).await;

    let mut second = server.accept().await;
    assert_eq!(second.target, "/?v=10&encoding=json");
    second.hello(45_000).await;
    second.recv_op(2).await;
    second.ready(1, "session-2", &server.resume_url()).await;

    wait_for_status(&gateway, ConnectionStatus::Connected).await;
    assert_eq!(gateway.session_id().as_deref(), Some("session-2"));

    gateway.close(true).await;
}

#[tokio::test]
async fn test_heartbeat_carries_sequence_and_measures_latency() {
    let server = FakeGateway::bind().await;
    let gateway = gateway_for(&server);

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut socket = server.accept().await;
    socket.hello(200).await;
    socket.recv_op(2).await;
    socket.ready(5, "session-1", &server.resume_url()).await;
    connecting.await.unwrap().unwrap();

    // The first beat can precede READY; ack until one carries the sequence
    loop {
        let beat = socket.recv_frame().await;
        assert_eq!(beat["op"], 1);
        socket.send(json!({"op": 11})).await;
        if beat["d"] == 5 {
            break;
        }
    }

    tokio::time::timeout(STEP_TIMEOUT, async {
        while gateway.latency().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("latency never measured");

    gateway.close(true).await;
}

#[tokio::test]
async fn test_close_without_invalidate_allows_resume() {
    let server = FakeGateway::bind().await;
    let gateway = gateway_for(&server);

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut first = server.accept().await;
    first.hello(45_000).await;
    first.recv_op(2).await;
    first.ready(4, "session-1", &server.resume_url()).await;
    connecting.await.unwrap().unwrap();

    gateway.close(false).await;
    assert_eq!(first.recv_close().await, Some(1012));
    assert_eq!(gateway.session_id().as_deref(), Some("session-1"));

    let resuming = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.resume(1012).await }
    });

    let mut second = server.accept().await;
    assert!(second.target.starts_with("/resume"));
    second.hello(45_000).await;
    let resume = second.recv_op(6).await;
    assert_eq!(resume["d"]["seq"], 4);
    resuming.await.unwrap().unwrap();

    second.dispatch("RESUMED", 5, json!({})).await;
    wait_for_status(&gateway, ConnectionStatus::Connected).await;

    gateway.close(true).await;
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let server = FakeGateway::bind().await;
    let url = server.entry_url();
    drop(server);

    let gateway = Gateway::builder(Token::new("Bot integration"))
        .entry_url(url)
        .handshake_timeout(STEP_TIMEOUT)
        .build()
        .unwrap();

    let err = gateway.connect().await.unwrap_err();
    assert!(
        matches!(err, GatewayError::Fatal { .. } | GatewayError::Transport(_)),
        "unexpected error {:?}",
        err
    );
    assert!(matches!(gateway.status(), ConnectionStatus::Failed(_)));
}
