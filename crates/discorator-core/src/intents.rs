//! Gateway intents.
//!
//! Intents are a bitmask the client declares in IDENTIFY. The platform only
//! delivers events whose category is enabled.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

/// A single named intent bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Guilds,
    GuildMembers,
    GuildModeration,
    GuildEmojisAndStickers,
    GuildIntegrations,
    GuildWebhooks,
    GuildInvites,
    GuildVoiceStates,
    GuildPresences,
    GuildMessages,
    GuildMessageReactions,
    GuildMessageTyping,
    DirectMessages,
    DirectMessageReactions,
    DirectMessageTyping,
    MessageContent,
    GuildScheduledEvents,
    AutoModerationConfiguration,
    AutoModerationExecution,
    GuildMessagePolls,
    DirectMessagePolls,
}

impl Intent {
    /// Every known intent, in bit order.
    pub const ALL: [Intent; 21] = [
        Intent::Guilds,
        Intent::GuildMembers,
        Intent::GuildModeration,
        Intent::GuildEmojisAndStickers,
        Intent::GuildIntegrations,
        Intent::GuildWebhooks,
        Intent::GuildInvites,
        Intent::GuildVoiceStates,
        Intent::GuildPresences,
        Intent::GuildMessages,
        Intent::GuildMessageReactions,
        Intent::GuildMessageTyping,
        Intent::DirectMessages,
        Intent::DirectMessageReactions,
        Intent::DirectMessageTyping,
        Intent::MessageContent,
        Intent::GuildScheduledEvents,
        Intent::AutoModerationConfiguration,
        Intent::AutoModerationExecution,
        Intent::GuildMessagePolls,
        Intent::DirectMessagePolls,
    ];

    /// The bit this intent occupies.
    pub const fn bit(self) -> u32 {
        match self {
            Intent::Guilds => 1 << 0,
            Intent::GuildMembers => 1 << 1,
            Intent::GuildModeration => 1 << 2,
            Intent::GuildEmojisAndStickers => 1 << 3,
            Intent::GuildIntegrations => 1 << 4,
            Intent::GuildWebhooks => 1 << 5,
            Intent::GuildInvites => 1 << 6,
            Intent::GuildVoiceStates => 1 << 7,
            Intent::GuildPresences => 1 << 8,
            Intent::GuildMessages => 1 << 9,
            Intent::GuildMessageReactions => 1 << 10,
            Intent::GuildMessageTyping => 1 << 11,
            Intent::DirectMessages => 1 << 12,
            Intent::DirectMessageReactions => 1 << 13,
            Intent::DirectMessageTyping => 1 << 14,
            Intent::MessageContent => 1 << 15,
            Intent::GuildScheduledEvents => 1 << 16,
            Intent::AutoModerationConfiguration => 1 << 20,
            Intent::AutoModerationExecution => 1 << 21,
            Intent::GuildMessagePolls => 1 << 24,
            Intent::DirectMessagePolls => 1 << 25,
        }
    }

    /// Canonical snake_case name.
    pub const fn name(self) -> &'static str {
        match self {
            Intent::Guilds => "guilds",
            Intent::GuildMembers => "guild_members",
            Intent::GuildModeration => "guild_moderation",
            Intent::GuildEmojisAndStickers => "guild_emojis_and_stickers",
            Intent::GuildIntegrations => "guild_integrations",
            Intent::GuildWebhooks => "guild_webhooks",
            Intent::GuildInvites => "guild_invites",
            Intent::GuildVoiceStates => "guild_voice_states",
            Intent::GuildPresences => "guild_presences",
            Intent::GuildMessages => "guild_messages",
            Intent::GuildMessageReactions => "guild_message_reactions",
            Intent::GuildMessageTyping => "guild_message_typing",
            Intent::DirectMessages => "direct_messages",
            Intent::DirectMessageReactions => "direct_message_reactions",
            Intent::DirectMessageTyping => "direct_message_typing",
            Intent::MessageContent => "message_content",
            Intent::GuildScheduledEvents => "guild_scheduled_events",
            Intent::AutoModerationConfiguration => "auto_moderation_configuration",
            Intent::AutoModerationExecution => "auto_moderation_execution",
            Intent::GuildMessagePolls => "guild_message_polls",
            Intent::DirectMessagePolls => "direct_message_polls",
        }
    }
}

impl FromStr for Intent {
    type Err = Error;

    /// Accepts `guild_messages`, `Guild_Messages`, `GUILD_MESSAGES` and `guild-messages`.
    /// `guild_emotes_and_stickers` is accepted as an alias.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        if normalized == "guild_emotes_and_stickers" {
            return Ok(Intent::GuildEmojisAndStickers);
        }
        Intent::ALL
            .iter()
            .copied()
            .find(|intent| intent.name() == normalized)
            .ok_or_else(|| Error::UnknownIntent(s.to_string()))
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of intents, serialized as the raw bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Intents(u32);

impl Intents {
    /// Guild messages, direct messages and message content.
    pub const DEFAULT_BITS: u32 = 37376;

    /// An empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from a raw bitmask. Unknown bits are kept as-is.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw bitmask sent in IDENTIFY.
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, intent: Intent) -> bool {
        self.0 & intent.bit() != 0
    }

    /// Whether any of the intents in `other` is enabled.
    pub const fn intersects(self, other: Intents) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, intent: Intent) {
        self.0 |= intent.bit();
    }

    /// The named intents enabled in this set.
    pub fn iter(self) -> impl Iterator<Item = Intent> {
        Intent::ALL.into_iter().filter(move |i| self.contains(*i))
    }

    /// Combine a list of intent names into one set.
    pub fn from_names<I, S>(names: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(Self::empty(), |acc, name| {
            Ok(acc | name.as_ref().parse::<Intent>()?)
        })
    }

    /// The intents under which the platform delivers `event`.
    ///
    /// Returns `None` for events that are not gated by any intent.
    pub fn for_event(event: &str) -> Option<Intents> {
        use Intent::*;

        let intents: &[Intent] = match event {
            "GUILD_CREATE" | "GUILD_UPDATE" | "GUILD_DELETE" | "GUILD_ROLE_CREATE"
            | "GUILD_ROLE_UPDATE" | "GUILD_ROLE_DELETE" | "CHANNEL_CREATE" | "CHANNEL_UPDATE"
            | "CHANNEL_DELETE" | "THREAD_CREATE" | "THREAD_UPDATE" | "THREAD_DELETE"
            | "THREAD_LIST_SYNC" | "THREAD_MEMBER_UPDATE" | "STAGE_INSTANCE_CREATE"
            | "STAGE_INSTANCE_UPDATE" | "STAGE_INSTANCE_DELETE" => &[Guilds],
            "CHANNEL_PINS_UPDATE" => &[Guilds, DirectMessages],
            "THREAD_MEMBERS_UPDATE" => &[Guilds, GuildMembers],
            "GUILD_MEMBER_ADD" | "GUILD_MEMBER_UPDATE" | "GUILD_MEMBER_REMOVE" => &[GuildMembers],
            "GUILD_AUDIT_LOG_ENTRY_CREATE" | "GUILD_BAN_ADD" | "GUILD_BAN_REMOVE" => {
                &[GuildModeration]
            }
            "GUILD_EMOJIS_UPDATE" | "GUILD_STICKERS_UPDATE" => &[GuildEmojisAndStickers],
            "GUILD_INTEGRATIONS_UPDATE" | "INTEGRATION_CREATE" | "INTEGRATION_UPDATE"
            | "INTEGRATION_DELETE" => &[GuildIntegrations],
            "WEBHOOKS_UPDATE" => &[GuildWebhooks],
            "INVITE_CREATE" | "INVITE_DELETE" => &[GuildInvites],
            "VOICE_STATE_UPDATE" => &[GuildVoiceStates],
            "PRESENCE_UPDATE" => &[GuildPresences],
            "MESSAGE_CREATE" | "MESSAGE_UPDATE" | "MESSAGE_DELETE" => {
                &[GuildMessages, DirectMessages]
            }
            "MESSAGE_DELETE_BULK" => &[GuildMessages],
            "MESSAGE_REACTION_ADD" | "MESSAGE_REACTION_REMOVE" | "MESSAGE_REACTION_REMOVE_ALL"
            | "MESSAGE_REACTION_REMOVE_EMOJI" => &[GuildMessageReactions, DirectMessageReactions],
            "TYPING_START" => &[GuildMessageTyping, DirectMessageTyping],
            "GUILD_SCHEDULED_EVENT_CREATE" | "GUILD_SCHEDULED_EVENT_UPDATE"
            | "GUILD_SCHEDULED_EVENT_DELETE" | "GUILD_SCHEDULED_EVENT_USER_ADD"
            | "GUILD_SCHEDULED_EVENT_USER_REMOVE" => &[GuildScheduledEvents],
            "AUTO_MODERATION_RULE_CREATE" | "AUTO_MODERATION_RULE_UPDATE"
            | "AUTO_MODERATION_RULE_DELETE" => &[AutoModerationConfiguration],
            "AUTO_MODERATION_ACTION_EXECUTION" => &[AutoModerationExecution],
            "MESSAGE_POLL_VOTE_ADD" | "MESSAGE_POLL_VOTE_REMOVE" => {
                &[GuildMessagePolls, DirectMessagePolls]
            }
            _ => return None,
        };

        Some(intents.iter().fold(Intents::empty(), |acc, i| acc | *i))
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self(Self::DEFAULT_BITS)
    }
}

impl From<Intent> for Intents {
    fn from(intent: Intent) -> Self {
        Self(intent.bit())
    }
}

impl BitOr<Intent> for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intent) -> Intents {
        Intents(self.0 | rhs.bit())
    }
}

impl BitOr for Intents {
    type Output = Intents;

    fn bitor(self, rhs: Intents) -> Intents {
        Intents(self.0 | rhs.0)
    }
}

impl BitOr for Intent {
    type Output = Intents;

    fn bitor(self, rhs: Intent) -> Intents {
        Intents(self.bit() | rhs.bit())
    }
}

impl BitOrAssign<Intent> for Intents {
    fn bitor_assign(&mut self, rhs: Intent) {
        self.insert(rhs);
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
