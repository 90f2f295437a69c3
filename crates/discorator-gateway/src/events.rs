//! Dispatched events and the subscriber registry.

use crate::protocol::ReadyPayload;
use async_trait::async_trait;
use discorator_core::Intents;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

macro_rules! event_kinds {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Name of a dispatched event.
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($variant,)*
            /// An event name this build does not know about.
            Unknown(String),
        }

        impl EventKind {
            /// Every known kind.
            pub const KNOWN: &'static [EventKind] = &[$(EventKind::$variant,)*];

            /// Look up a kind by its wire name.
            pub fn from_name(name: &str) -> Self {
                match name {
                    $($name => EventKind::$variant,)*
                    other => EventKind::Unknown(other.to_string()),
                }
            }

            /// The wire name, e.g. `MESSAGE_CREATE`.
            pub fn name(&self) -> &str {
                match self {
                    $(EventKind::$variant => $name,)*
                    EventKind::Unknown(name) => name,
                }
            }
        }
    };
}

event_kinds! {
    Ready => "READY",
    Resumed => "RESUMED",
    ApplicationCommandPermissionsUpdate => "APPLICATION_COMMAND_PERMISSIONS_UPDATE",
    AutoModerationRuleCreate => "AUTO_MODERATION_RULE_CREATE",
    AutoModerationRuleUpdate => "AUTO_MODERATION_RULE_UPDATE",
    AutoModerationRuleDelete => "AUTO_MODERATION_RULE_DELETE",
    AutoModerationActionExecution => "AUTO_MODERATION_ACTION_EXECUTION",
    ChannelCreate => "CHANNEL_CREATE",
    ChannelUpdate => "CHANNEL_UPDATE",
    ChannelDelete => "CHANNEL_DELETE",
    ChannelPinsUpdate => "CHANNEL_PINS_UPDATE",
    ThreadCreate => "THREAD_CREATE",
    ThreadUpdate => "THREAD_UPDATE",
    ThreadDelete => "THREAD_DELETE",
    ThreadListSync => "THREAD_LIST_SYNC",
    ThreadMemberUpdate => "THREAD_MEMBER_UPDATE",
    ThreadMembersUpdate => "THREAD_MEMBERS_UPDATE",
    EntitlementCreate => "ENTITLEMENT_CREATE",
    EntitlementUpdate => "ENTITLEMENT_UPDATE",
    EntitlementDelete => "ENTITLEMENT_DELETE",
    GuildCreate => "GUILD_CREATE",
    GuildUpdate => "GUILD_UPDATE",
    GuildDelete => "GUILD_DELETE",
    GuildAuditLogEntryCreate => "GUILD_AUDIT_LOG_ENTRY_CREATE",
    GuildBanAdd => "GUILD_BAN_ADD",
    GuildBanRemove => "GUILD_BAN_REMOVE",
    GuildEmojisUpdate => "GUILD_EMOJIS_UPDATE",
    GuildStickersUpdate => "GUILD_STICKERS_UPDATE",
    GuildIntegrationsUpdate => "GUILD_INTEGRATIONS_UPDATE",
    GuildMemberAdd => "GUILD_MEMBER_ADD",
    GuildMemberRemove => "GUILD_MEMBER_REMOVE",
    GuildMemberUpdate => "GUILD_MEMBER_UPDATE",
    GuildMembersChunk => "GUILD_MEMBERS_CHUNK",
    GuildRoleCreate => "GUILD_ROLE_CREATE",
    GuildRoleUpdate => "GUILD_ROLE_UPDATE",
    GuildRoleDelete => "GUILD_ROLE_DELETE",
    GuildScheduledEventCreate => "GUILD_SCHEDULED_EVENT_CREATE",
    GuildScheduledEventUpdate => "GUILD_SCHEDULED_EVENT_UPDATE",
    GuildScheduledEventDelete => "GUILD_SCHEDULED_EVENT_DELETE",
    GuildScheduledEventUserAdd => "GUILD_SCHEDULED_EVENT_USER_ADD",
    GuildScheduledEventUserRemove => "GUILD_SCHEDULED_EVENT_USER_REMOVE",
    IntegrationCreate => "INTEGRATION_CREATE",
    IntegrationUpdate => "INTEGRATION_UPDATE",
    IntegrationDelete => "INTEGRATION_DELETE",
    InteractionCreate => "INTERACTION_CREATE",
    InviteCreate => "INVITE_CREATE",
    InviteDelete => "INVITE_DELETE",
    MessageCreate => "MESSAGE_CREATE",
    MessageUpdate => "MESSAGE_UPDATE",
    MessageDelete => "MESSAGE_DELETE",
    MessageDeleteBulk => "MESSAGE_DELETE_BULK",
    MessageReactionAdd => "MESSAGE_REACTION_ADD",
    MessageReactionRemove => "MESSAGE_REACTION_REMOVE",
    MessageReactionRemoveAll => "MESSAGE_REACTION_REMOVE_ALL",
    MessageReactionRemoveEmoji => "MESSAGE_REACTION_REMOVE_EMOJI",
    MessagePollVoteAdd => "MESSAGE_POLL_VOTE_ADD",
    MessagePollVoteRemove => "MESSAGE_POLL_VOTE_REMOVE",
    PresenceUpdate => "PRESENCE_UPDATE",
    StageInstanceCreate => "STAGE_INSTANCE_CREATE",
    StageInstanceUpdate => "STAGE_INSTANCE_UPDATE",
    StageInstanceDelete => "STAGE_INSTANCE_DELETE",
    TypingStart => "TYPING_START",
    UserUpdate => "USER_UPDATE",
    VoiceStateUpdate => "VOICE_STATE_UPDATE",
    VoiceServerUpdate => "VOICE_SERVER_UPDATE",
    WebhooksUpdate => "WEBHOOKS_UPDATE",
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind of an interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    Ping,
    ApplicationCommand,
    MessageComponent,
    ApplicationCommandAutocomplete,
    ModalSubmit,
    Other(u8),
}

impl From<u8> for InteractionType {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Ping,
            2 => Self::ApplicationCommand,
            3 => Self::MessageComponent,
            4 => Self::ApplicationCommandAutocomplete,
            5 => Self::ModalSubmit,
            other => Self::Other(other),
        }
    }
}

/// An INTERACTION_CREATE payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,

    pub application_id: String,

    #[serde(rename = "type")]
    pub kind_code: u8,

    /// Continuation token for responding to this interaction.
    pub token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Interaction {
    pub fn kind(&self) -> InteractionType {
        InteractionType::from(self.kind_code)
    }

    /// Name of the invoked command, for command and autocomplete interactions.
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref()?.get("name")?.as_str()
    }

    /// Id of the invoking user, from `member.user` in guilds or `user` in DMs.
    pub fn user_id(&self) -> Option<&str> {
        self.member
            .as_ref()
            .and_then(|m| m.get("user"))
            .or(self.user.as_ref())?
            .get("id")?
            .as_str()
    }
}

/// Payload of a dispatched event after transforms.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Ready(ReadyPayload),
    Interaction(Box<Interaction>),
    Raw(Value),
}

impl EventPayload {
    pub fn as_raw(&self) -> Option<&Value> {
        match self {
            Self::Raw(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ready(&self) -> Option<&ReadyPayload> {
        match self {
            Self::Ready(ready) => Some(ready),
            _ => None,
        }
    }

    pub fn as_interaction(&self) -> Option<&Interaction> {
        match self {
            Self::Interaction(interaction) => Some(interaction),
            _ => None,
        }
    }

    /// Back to plain JSON.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Raw(value) => value.clone(),
            Self::Ready(ready) => serde_json::to_value(ready).unwrap_or(Value::Null),
            Self::Interaction(interaction) => {
                serde_json::to_value(interaction).unwrap_or(Value::Null)
            }
        }
    }
}

/// One event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub sequence: u64,
}

/// Receives dispatched events.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: DispatchedEvent);
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(DispatchedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, event: DispatchedEvent) {
        (self)(event).await
    }
}

/// Identifies a registration so it can be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    handler: Arc<dyn EventHandler>,
    once: bool,
}

const BROADCAST_CAPACITY: usize = 256;

/// Subscriber registry keyed by event kind.
pub struct EventRegistry {
    handlers: RwLock<HashMap<EventKind, Vec<Registration>>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<DispatchedEvent>,
    intents: Option<Intents>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// Registry without intent checks.
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broadcast,
            intents: None,
        }
    }

    /// Registry that warns when a handler is registered for an event the intents never deliver.
    pub fn with_intent_check(intents: Intents) -> Self {
        Self {
            intents: Some(intents),
            ..Self::new()
        }
    }

    /// Call `handler` for every event of `kind`.
    pub fn on(&self, kind: impl Into<EventKind>, handler: impl EventHandler) -> HandlerId {
        self.register(kind.into(), Arc::new(handler), false)
    }

    /// Call `handler` for the next event of `kind` only.
    pub fn once(&self, kind: impl Into<EventKind>, handler: impl EventHandler) -> HandlerId {
        self.register(kind.into(), Arc::new(handler), true)
    }

    /// Remove every handler for `kind`. Returns how many were removed.
    pub fn off(&self, kind: impl Into<EventKind>) -> usize {
        self.handlers
            .write()
            .remove(&kind.into())
            .map_or(0, |regs| regs.len())
    }

    /// Remove one handler.
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let mut removed = false;
        for regs in handlers.values_mut() {
            let before = regs.len();
            regs.retain(|r| r.id != id);
            removed |= regs.len() != before;
        }
        handlers.retain(|_, regs| !regs.is_empty());
        removed
    }

    /// Receive every dispatched event.
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchedEvent> {
        self.broadcast.subscribe()
    }

    pub fn handler_count(&self, kind: &EventKind) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    fn register(&self, kind: EventKind, handler: Arc<dyn EventHandler>, once: bool) -> HandlerId {
        if let Some(intents) = self.intents {
            if let Some(required) = Intents::for_event(kind.name()) {
                if !intents.intersects(required) {
                    warn!(
                        "Handler registered for {} but none of its intents ({}) are enabled",
                        kind, required
                    );
                }
            }
        }

        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Registration { id, handler, once });
        id
    }

    /// Deliver an event to its handlers and to broadcast subscribers.
    pub async fn emit(&self, event: DispatchedEvent) {
        // Snapshot under the lock; one-shot handlers are removed before they run
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let mut map = self.handlers.write();
            match map.get_mut(&event.kind) {
                Some(regs) => {
                    let snapshot = regs.iter().map(|r| Arc::clone(&r.handler)).collect();
                    regs.retain(|r| !r.once);
                    if regs.is_empty() {
                        map.remove(&event.kind);
                    }
                    snapshot
                }
                None => Vec::new(),
            }
        };

        debug!(
            "Emitting {} (seq {}) to {} handler(s)",
            event.kind,
            event.sequence,
            handlers.len()
        );

        for handler in handlers {
            handler.handle(event.clone()).await;
        }

        // No receivers is fine
        let _ = self.broadcast.send(event);
    }
}
