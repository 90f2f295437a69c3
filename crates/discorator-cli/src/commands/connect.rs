//! Connect command.

use super::load_config;
use clap::Args;
use discorator_core::{AccountType, Config, Intents, Token};
use discorator_gateway::{ConnectionStatus, DispatchedEvent, EventPayload, Gateway};
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Connect command arguments.
#[derive(Args)]
pub struct ConnectArgs {
    /// Bearer token (overrides the config file)
    #[arg(short, long, env = "DISCORATOR_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Treat the token as a user token instead of a bot token
    #[arg(long)]
    pub user: bool,

    /// Intent names, comma separated (overrides the config file)
    #[arg(short, long, value_delimiter = ',')]
    pub intents: Vec<String>,

    /// Override the gateway entry address
    #[arg(long)]
    pub url: Option<String>,

    /// Log socket lifecycle at info level
    #[arg(long)]
    pub lifecycle: bool,
}

/// Apply command-line overrides on top of the loaded config.
fn apply_overrides(mut config: Config, args: &ConnectArgs) -> anyhow::Result<Config> {
    if let Some(token) = &args.token {
        config.account.token = Some(Token::new(token.as_str()));
    }
    if args.user {
        config.account.user_type = AccountType::User;
    }
    if !args.intents.is_empty() {
        config.gateway.intents = Intents::from_names(&args.intents)?;
    }
    if let Some(url) = &args.url {
        config.gateway.url = url.clone();
    }
    if args.lifecycle {
        config.gateway.verbose = true;
    }
    Ok(config)
}

/// One line per dispatched event.
fn describe(event: &DispatchedEvent) -> String {
    let detail = match &event.payload {
        EventPayload::Ready(ready) => format!("session {}", ready.session_id),
        EventPayload::Interaction(interaction) => format!(
            "{:?} {}",
            interaction.kind(),
            interaction.command_name().unwrap_or("-")
        ),
        EventPayload::Raw(value) => {
            let text = value.to_string();
            if text.len() > 120 {
                let cut = (0..=120).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
                format!("{}...", &text[..cut])
            } else {
                text
            }
        }
    };
    format!(
        "{} #{} {} {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        event.sequence,
        event.kind,
        detail
    )
}

/// Run the connect command.
pub async fn run(args: ConnectArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = apply_overrides(load_config(config_path)?, &args)?;
    let gateway = Gateway::from_config(&config)?;

    let mut events = gateway.subscribe();
    let mut status = gateway.watch_status();

    info!("Connecting to {} (intents {})", config.gateway.url, gateway.intents());
    gateway.connect().await?;
    info!(
        "Session {} established",
        gateway.session_id().unwrap_or_default()
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, closing session");
                break Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe(&event)),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break Ok(()),
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = status.borrow_and_update().clone();
                info!("Gateway {}", current);
                if let ConnectionStatus::Failed(reason) = current {
                    break Err(anyhow::anyhow!("Gateway session failed: {}", reason));
                }
            }
        }
    };

    gateway.close(true).await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use discorator_core::Intent;
    use discorator_gateway::EventKind;
    use serde_json::json;

    fn args() -> ConnectArgs {
        ConnectArgs {
            token: None,
            user: false,
            intents: Vec::new(),
            url: None,
            lifecycle: false,
        }
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let args = ConnectArgs {
            token: Some("abc".to_string()),
            intents: vec!["guilds".to_string(), "direct_messages".to_string()],
            url: Some("ws://127.0.0.1:9000/".to_string()),
            lifecycle: true,
            ..args()
        };

        let config = apply_overrides(Config::default(), &args).unwrap();
        assert_eq!(config.account.resolved_token().unwrap().expose(), "Bot abc");
        assert_eq!(
            config.gateway.intents,
            Intents::from(Intent::Guilds) | Intent::DirectMessages
        );
        assert_eq!(config.gateway.url, "ws://127.0.0.1:9000/");
        assert!(config.gateway.verbose);
    }

    #[test]
    fn test_user_token_is_not_prefixed() {
        let args = ConnectArgs {
            token: Some("abc".to_string()),
            user: true,
            ..args()
        };
        let config = apply_overrides(Config::default(), &args).unwrap();
        assert_eq!(config.account.resolved_token().unwrap().expose(), "abc");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let config = apply_overrides(Config::default(), &args()).unwrap();
        assert!(config.account.token.is_none());
        assert_eq!(config.gateway.intents, Intents::default());
    }

    #[test]
    fn test_unknown_intent_is_rejected() {
        let args = ConnectArgs {
            intents: vec!["guild_gossip".to_string()],
            ..args()
        };
        assert!(apply_overrides(Config::default(), &args).is_err());
    }

    #[test]
    fn test_describe_truncates_raw_payloads() {
        let event = DispatchedEvent {
            kind: EventKind::MessageCreate,
            payload: EventPayload::Raw(json!({"content": "x".repeat(500)})),
            sequence: 7,
        };
        let line = describe(&event);
        assert!(line.contains("#7 MESSAGE_CREATE"));
        assert!(line.ends_with("..."));
        assert!(line.len() < 200);
    }
}
