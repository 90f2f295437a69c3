//! Config file integration tests.
//!
//! These tests write configuration to disk, load it back, and check that
//! the loaded values shape the engine the same way.

use discorator_core::config::{CloseCodeRule, Config};
use discorator_core::{AccountType, Intent, Intents, Token};
use discorator_gateway::{codes, ConnectionStatus, Gateway};
use discorator_integration_tests::{FakeGateway, STEP_TIMEOUT};
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("discorator.json5");

    let mut config = Config::default();
    config.account.token = Some(Token::new("abc"));
    config.gateway.intents = Intents::from(Intent::Guilds) | Intent::GuildMessages;
    config.gateway.handshake_timeout_secs = 12;
    config.heartbeat.require_ack = false;
    config.reconnect.backoff.max_attempts = 3;
    config.reconnect.close_codes.insert(
        "4004".to_string(),
        CloseCodeRule {
            recoverable: true,
            reason: "Retry".to_string(),
        },
    );
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.account.resolved_token().unwrap().expose(), "Bot abc");
    assert_eq!(loaded.gateway.intents, config.gateway.intents);
    assert_eq!(loaded.gateway.url, config.gateway.url);
    assert_eq!(loaded.gateway.properties, config.gateway.properties);
    assert_eq!(loaded.gateway.handshake_timeout_secs, 12);
    assert!(!loaded.heartbeat.require_ack);
    assert_eq!(loaded.reconnect.backoff, config.reconnect.backoff);
    assert_eq!(loaded.reconnect.close_codes, config.reconnect.close_codes);
}

#[test]
fn test_hand_written_json5() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("discorator.json5");
    std::fs::write(
        &path,
        r#"{
            // user accounts keep the token as-is
            account: { user_type: "user", token: "raw-token" },
            gateway: { intents: 513, verbose: true },
            reconnect: {
                unknown_codes_recoverable: false,
                close_codes: { "4014": { recoverable: true, reason: "Allowed here" } },
            },
        }"#,
    )
    .unwrap();

    let config = Config::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.account.user_type, AccountType::User);
    assert_eq!(config.account.resolved_token().unwrap().expose(), "raw-token");

    let gateway = Gateway::from_config(&config).unwrap();
    assert_eq!(
        gateway.intents(),
        Intents::from(Intent::Guilds) | Intent::GuildMessages
    );
    assert!(gateway.policy().classify(4014).recoverable);
    assert!(!gateway.policy().classify(4567).recoverable);
    assert!(!gateway.policy().classify(codes::AUTHENTICATION_FAILED).recoverable);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = TempDir::new().unwrap();
    assert!(Config::load(&dir.path().join("absent.json5")).is_err());
}

#[tokio::test]
async fn test_configured_override_resumes_on_normally_fatal_code() {
    let server = FakeGateway::bind().await;

    let mut config = Config::default();
    config.account.token = Some(Token::new("abc"));
    config.gateway.url = server.entry_url();
    config.gateway.handshake_timeout_secs = STEP_TIMEOUT.as_secs();
    config.reconnect.close_codes.insert(
        "4004".to_string(),
        CloseCodeRule {
            recoverable: true,
            reason: "Token rotated".to_string(),
        },
    );
    let gateway = Gateway::from_config(&config).unwrap();

    let connecting = tokio::spawn({
        let gateway = gateway.clone();
        async move { gateway.connect().await }
    });

    let mut first = server.accept().await;
    first.hello(45_000).await;
    assert_eq!(first.recv_op(2).await["d"]["token"], "Bot abc");
    first.ready(1, "session-1", &server.resume_url()).await;
    connecting.await.unwrap().unwrap();

    first.close(codes::AUTHENTICATION_FAILED).await;

    let mut second = server.accept().await;
    second.hello(45_000).await;
    let resume = second.recv_op(6).await;
    assert_eq!(resume["d"]["session_id"], "session-1");
    second
        .dispatch("RESUMED", 2, serde_json::json!({}))
        .await;

    let mut status = gateway.watch_status();
    tokio::time::timeout(
        STEP_TIMEOUT,
        status.wait_for(|s| *s == ConnectionStatus::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    gateway.close(true).await;
}
