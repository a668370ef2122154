//! General-purpose features: server and member info, welcome messages for
//! new members and a few canned replies.

use chrono::{DateTime, NaiveDate};
use serenity::{
    builder::CreateMessage,
    model::{
        channel::ChannelType,
        guild::{Guild, Member},
        id::{RoleId, UserId},
        Timestamp,
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

/// Shown as "Competing in a music contest".
pub const PRESENCE: &str = "a music contest";

pub const HELLO: &str = "Hello! 👋";
pub const INVITE_URL: &str = "https://discord.gg/sRmsVRNNRv";
pub const PLAYLIST_URL: &str =
    "https://open.spotify.com/playlist/52cc4UPXBRFBHcrPFLbckf?si=90bff350651f4626";

const DATE_FORMAT: &str = "%B %d, %Y";

fn date_of(timestamp: Timestamp) -> Option<NaiveDate> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0).map(|at| at.date_naive())
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|date| date.format(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    pub name: String,
    pub id: u64,
    pub owner_id: u64,
    pub created: Option<NaiveDate>,
    pub members: u64,
    pub bots: u64,
    pub text_channels: usize,
    pub voice_channels: usize,
    pub categories: usize,
    /// Excludes `@everyone`
    pub roles: usize,
}

impl ServerSummary {
    pub fn from_guild(guild: &Guild) -> Self {
        let count = |kind: ChannelType| {
            guild
                .channels
                .values()
                .filter(|channel| channel.kind == kind)
                .count()
        };
        // Bots are counted from the member cache, the total comes from the gateway
        let bots = guild.members.values().filter(|member| member.user.bot).count() as u64;

        Self {
            name: guild.name.clone(),
            id: guild.id.get(),
            owner_id: guild.owner_id.get(),
            created: date_of(guild.id.created_at()),
            members: guild.member_count.max(guild.members.len() as u64),
            bots,
            text_channels: count(ChannelType::Text),
            voice_channels: count(ChannelType::Voice),
            categories: count(ChannelType::Category),
            roles: guild.roles.len().saturating_sub(1),
        }
    }

    pub fn render(&self) -> String {
        [
            format!("📊 **{} Server Information**", self.name),
            format!("👑 Owner: <@{}>", self.owner_id),
            format!("📅 Created On: {}", format_date(self.created)),
            format!("🆔 Server ID: {}", self.id),
            format!(
                "👥 Members: {} total, {} humans, {} bots",
                self.members,
                self.members.saturating_sub(self.bots),
                self.bots
            ),
            format!(
                "💬 Channels: {} text, {} voice, {} categories",
                self.text_channels, self.voice_channels, self.categories
            ),
            format!("🎭 Roles: {}", self.roles),
        ]
        .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSummary {
    pub name: String,
    pub id: u64,
    pub nickname: Option<String>,
    pub created: Option<NaiveDate>,
    pub joined: Option<NaiveDate>,
    /// Highest role first
    pub roles: Vec<RoleId>,
}

impl MemberSummary {
    /// `roles` should already be ordered; the member's own list is unordered.
    pub fn new(member: &Member, roles: Vec<RoleId>) -> Self {
        Self {
            name: member.user.name.clone(),
            id: member.user.id.get(),
            nickname: member.nick.clone(),
            created: date_of(member.user.id.created_at()),
            joined: member.joined_at.and_then(date_of),
            roles,
        }
    }

    pub fn render(&self) -> String {
        let roles = if self.roles.is_empty() {
            "No roles".to_string()
        } else {
            self.roles
                .iter()
                .map(|role| format!("<@&{}>", role))
                .collect::<Vec<_>>()
                .join(" ")
        };

        [
            format!("👤 **User Information: {}**", self.name),
            format!("🆔 User ID: {}", self.id),
            format!("🏷️ Nickname: {}", self.nickname.as_deref().unwrap_or("None")),
            format!("📅 Account Created: {}", format_date(self.created)),
            format!("📥 Joined Server: {}", format_date(self.joined)),
            format!("🎭 Roles [{}]: {}", self.roles.len(), roles),
        ]
        .join("\n")
    }
}

pub fn welcome_announcement(user_id: UserId) -> String {
    format!(
        "**Welcome!** Welcome to the server, <@{}>! 🎉\n\
         Check out our channels and don't forget to read the rules!",
        user_id
    )
}

pub fn welcome_dm(guild_name: &str, prefix: &str) -> String {
    format!(
        "**Welcome to {}!** We're glad to have you here! 👋\n\
         Need help? Feel free to ask questions in the server!\n\
         Use `{}help` to see available commands.",
        guild_name, prefix
    )
}

/// Greets a new member in the system channel (when the guild has one) and
/// by direct message. Members with DMs closed only get the public greeting.
pub async fn greet_member(ctx: &Context, member: &Member, prefix: &str) {
    let (guild_name, system_channel) = match member.guild_id.to_guild_cached(&ctx.cache) {
        Some(guild) => (guild.name.clone(), guild.system_channel_id),
        None => (member.guild_id.to_string(), None),
    };

    info!("👋 {} joined {}", member.user.name, guild_name);

    if let Some(channel_id) = system_channel {
        if let Err(e) = channel_id
            .say(&ctx.http, welcome_announcement(member.user.id))
            .await
        {
            warn!("Error posting welcome in guild {}: {:?}", member.guild_id, e);
        }
    }

    let dm = CreateMessage::new().content(welcome_dm(&guild_name, prefix));
    if let Err(e) = member.user.direct_message(ctx, dm).await {
        debug!("Could not DM {}: {:?}", member.user.name, e);
    }
}
