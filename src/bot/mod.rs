//! # Bot Module
//!
//! Discord-facing side of Harmony Bot.
//!
//! [`HarmonyBot`] implements Serenity's [`EventHandler`]:
//!
//! - `message`: prefix commands, parsed and dispatched by [`commands`]
//! - `ready`: sets the presence and starts the calendar tasks in [`scheduler`]
//!   (once, even across reconnects)
//! - `guild_member_addition`: welcomes new members, see [`general`]
//! - `voice_state_update`: tells the music core when the bot was removed from voice
//!
//! The handler owns no music state itself; everything goes through
//! [`MusicService`], which keeps one session per guild.

use serenity::{
    all::{ActivityData, Context, EventHandler, Member, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::Mutex;
use tracing::{error, info};

pub mod commands;
pub mod general;
pub mod scheduler;

use crate::{audio::MusicService, config::Config, storage::JsonStorage};
use commands::Command;

pub struct HarmonyBot {
    pub(crate) config: Arc<Config>,
    pub(crate) music: MusicService,
    pub(crate) storage: Arc<Mutex<JsonStorage>>,
    scheduler_started: AtomicBool,
}

impl HarmonyBot {
    pub fn new(config: Config, music: MusicService, storage: Arc<Mutex<JsonStorage>>) -> Self {
        Self {
            config: Arc::new(config),
            music,
            storage,
            scheduler_started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for HarmonyBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} servers", ready.guilds.len());

        ctx.set_activity(Some(ActivityData::competing(general::PRESENCE)));

        if !self.scheduler_started.swap(true, Ordering::SeqCst) {
            scheduler::spawn_calendar_tasks(ctx, self.storage.clone(), &self.config);
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(command) = Command::parse(&self.config.command_prefix, &msg.content) else {
            return;
        };

        if let Err(e) = commands::execute(&ctx, &msg, self, command).await {
            error!("Error handling command '{}': {:?}", msg.content, e);
        }
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        general::greet_member(&ctx, &new_member, &self.config.command_prefix).await;
    }

    /// Only the bot's own transitions out of voice matter here; a kick or a
    /// manual disconnect tears the guild's session down. The channel it left
    /// goes along so a late event from a previous connection is ignored.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            let left = old.and_then(|state| state.channel_id);
            self.music.voice_disconnected(guild_id, left);
        }
    }
}
