//! Prefix command parsing and dispatch.
//!
//! Parsing is pure and unit tested; [`execute`] maps each command onto
//! [`MusicService`](crate::audio::MusicService), storage or the calendar and
//! replies with plain text. Typed errors are rendered here and nowhere else.

use anyhow::Result;
use chrono::Local;
use regex::Regex;
use serenity::{
    builder::EditMessage,
    model::{
        channel::Message,
        id::{ChannelId, GuildId, RoleId, UserId},
    },
    prelude::Context,
};
use std::{sync::LazyLock, time::Instant};
use tracing::{info, warn};

use crate::{
    audio::{
        session::{EnqueueOutcome, QueueSnapshot},
        track::{format_duration, TrackDescriptor},
        MusicError,
    },
    bot::{general, HarmonyBot},
    calendar::{birthday, next_holiday, Birthday},
};

static CHANNEL_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:<#(\d+)>|(\d+))$").expect("channel pattern is valid"));
static ROLE_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:<@&(\d+)>|(\d+))$").expect("role pattern is valid"));
static USER_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:<@!?(\d+)>|(\d+))$").expect("user pattern is valid"));

/// How many upcoming tracks `queue` lists before summarising the rest.
const QUEUE_PAGE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Music,
    Birthdays,
    Holidays,
    General,
}

impl Category {
    const ALL: [Category; 4] = [Self::Music, Self::Birthdays, Self::Holidays, Self::General];

    fn heading(self) -> &'static str {
        match self {
            Self::Music => "🎵 **Music**",
            Self::Birthdays => "🎂 **Birthdays**",
            Self::Holidays => "🎉 **Holidays**",
            Self::General => "⚙️ **General**",
        }
    }
}

/// Help entry for one command.
#[derive(Debug)]
pub struct CommandInfo {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub args: &'static str,
    pub summary: &'static str,
    pub category: Category,
}

impl CommandInfo {
    pub fn usage(&self, prefix: &str) -> String {
        if self.args.is_empty() {
            format!("`{}{}`", prefix, self.name)
        } else {
            format!("`{}{} {}`", prefix, self.name, self.args)
        }
    }
}

macro_rules! command {
    ($category:ident, $name:literal, [$($alias:literal),*], $args:literal, $summary:literal) => {
        CommandInfo {
            name: $name,
            aliases: &[$($alias),*],
            args: $args,
            summary: $summary,
            category: Category::$category,
        }
    };
}

pub const COMMANDS: &[CommandInfo] = &[
    command!(Music, "join", [], "", "Join your voice channel"),
    command!(Music, "leave", [], "", "Leave the voice channel"),
    command!(Music, "play", ["p"], "<song or URL>", "Play a song or add it to the queue"),
    command!(Music, "pause", [], "", "Pause playback"),
    command!(Music, "resume", [], "", "Resume playback"),
    command!(Music, "skip", [], "", "Skip the current song"),
    command!(Music, "stop", [], "", "Stop playback and clear the queue"),
    command!(Music, "queue", ["q"], "", "Show the queue"),
    command!(Music, "nowplaying", ["np"], "", "Show the current song"),
    command!(Music, "shuffle", [], "", "Shuffle the queue"),
    command!(Music, "loop", [], "[off|single|queue]", "Set loop mode"),
    command!(Music, "volume", ["vol"], "<0-100>", "Set the volume"),
    command!(Birthdays, "setbirthday", [], "MM-DD", "Set your birthday"),
    command!(Birthdays, "upcoming_birthdays", [], "[days]", "Show upcoming birthdays"),
    command!(Birthdays, "set_birthday_channel", [], "[#channel]", "Set the announcement channel"),
    command!(Birthdays, "set_birthday_role", [], "@role", "Set the birthday role"),
    command!(Holidays, "next_holiday", [], "", "Show the next holiday"),
    command!(Holidays, "set_holiday_channel", [], "[#channel]", "Set the announcement channel"),
    command!(Holidays, "holiday_channel", [], "", "Show the announcement channel"),
    command!(General, "ping", [], "", "Check that the bot is responsive"),
    command!(General, "serverinfo", [], "", "Show information about this server"),
    command!(General, "userinfo", [], "[@member]", "Show information about a member"),
    command!(General, "hello", [], "", "Say hello"),
    command!(General, "invite", [], "", "Get the server invite link"),
    command!(General, "vaporclub", [], "", "Get the club playlist"),
    command!(General, "help", [], "[command]", "Show this message, or details for one command"),
];

/// Finds a command by name or alias, ignoring case.
pub fn lookup(name: &str) -> Option<&'static CommandInfo> {
    let name = name.to_lowercase();
    COMMANDS
        .iter()
        .find(|info| info.name == name || info.aliases.contains(&name.as_str()))
}

/// The full command list, grouped by category.
pub fn help_text(prefix: &str) -> String {
    let mut sections = vec!["**🤖 Bot Commands**".to_string()];
    for category in Category::ALL {
        let mut section = vec![category.heading().to_string()];
        section.extend(
            COMMANDS
                .iter()
                .filter(|info| info.category == category)
                .map(|info| format!("{} - {}", info.usage(prefix), info.summary)),
        );
        sections.push(section.join("\n"));
    }
    sections.join("\n\n")
}

/// Details for a single command: summary, aliases and usage.
pub fn command_help(prefix: &str, name: &str) -> String {
    let name = name.strip_prefix(prefix).unwrap_or(name);
    let Some(info) = lookup(name) else {
        return format!("❌ Command `{}` not found.", name);
    };

    let mut lines = vec![format!("**Help: {}**", info.name), info.summary.to_string()];
    if !info.aliases.is_empty() {
        lines.push(format!("**Aliases:** {}", info.aliases.join(", ")));
    }
    lines.push(format!("**Usage:** {}", info.usage(prefix)));
    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
    Play(String),
    Pause,
    Resume,
    Skip,
    Stop,
    Queue,
    NowPlaying,
    Shuffle,
    Loop(Option<String>),
    Volume(Option<String>),
    SetBirthday(Option<String>),
    SetBirthdayChannel(Option<String>),
    SetBirthdayRole(Option<String>),
    UpcomingBirthdays(Option<String>),
    NextHoliday,
    SetHolidayChannel(Option<String>),
    HolidayChannel,
    Ping,
    ServerInfo,
    UserInfo(Option<String>),
    Hello,
    Invite,
    VaporClub,
    Help(Option<String>),
}

impl Command {
    /// Parses a message. `None` when it is not addressed to the bot or the
    /// command is unknown.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let body = content.trim().strip_prefix(prefix)?;
        let (name, rest) = match body.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (body, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        // A bare prefix shows help too
        if name.is_empty() {
            return Some(Self::Help(None));
        }

        let command = match lookup(name)?.name {
            "join" => Self::Join,
            "leave" => Self::Leave,
            "play" => Self::Play(arg.unwrap_or_default()),
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "skip" => Self::Skip,
            "stop" => Self::Stop,
            "queue" => Self::Queue,
            "nowplaying" => Self::NowPlaying,
            "shuffle" => Self::Shuffle,
            "loop" => Self::Loop(arg),
            "volume" => Self::Volume(arg),
            "setbirthday" => Self::SetBirthday(arg),
            "set_birthday_channel" => Self::SetBirthdayChannel(arg),
            "set_birthday_role" => Self::SetBirthdayRole(arg),
            "upcoming_birthdays" => Self::UpcomingBirthdays(arg),
            "next_holiday" => Self::NextHoliday,
            "set_holiday_channel" => Self::SetHolidayChannel(arg),
            "holiday_channel" => Self::HolidayChannel,
            "ping" => Self::Ping,
            "serverinfo" => Self::ServerInfo,
            "userinfo" => Self::UserInfo(arg),
            "hello" => Self::Hello,
            "invite" => Self::Invite,
            "vaporclub" => Self::VaporClub,
            "help" => Self::Help(arg),
            _ => return None,
        };

        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Play(_) => "play",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Skip => "skip",
            Self::Stop => "stop",
            Self::Queue => "queue",
            Self::NowPlaying => "nowplaying",
            Self::Shuffle => "shuffle",
            Self::Loop(_) => "loop",
            Self::Volume(_) => "volume",
            Self::SetBirthday(_) => "setbirthday",
            Self::SetBirthdayChannel(_) => "set_birthday_channel",
            Self::SetBirthdayRole(_) => "set_birthday_role",
            Self::UpcomingBirthdays(_) => "upcoming_birthdays",
            Self::NextHoliday => "next_holiday",
            Self::SetHolidayChannel(_) => "set_holiday_channel",
            Self::HolidayChannel => "holiday_channel",
            Self::Ping => "ping",
            Self::ServerInfo => "serverinfo",
            Self::UserInfo(_) => "userinfo",
            Self::Hello => "hello",
            Self::Invite => "invite",
            Self::VaporClub => "vaporclub",
            Self::Help(_) => "help",
        }
    }
}

/// Usage line for `name`, as shown in error replies.
fn usage(prefix: &str, name: &str) -> String {
    lookup(name)
        .map(|info| info.usage(prefix))
        .unwrap_or_else(|| format!("`{}{}`", prefix, name))
}

/// Runs a parsed command and replies in the message's channel.
pub async fn execute(ctx: &Context, msg: &Message, bot: &HarmonyBot, command: Command) -> Result<()> {
    let Some(guild_id) = msg.guild_id else {
        msg.channel_id
            .say(&ctx.http, "❌ Commands only work inside a server.")
            .await?;
        return Ok(());
    };

    let prefix = bot.config.command_prefix.as_str();
    info!(
        "📝 Command {}{} used by {} in guild {}",
        prefix,
        command.name(),
        msg.author.name,
        guild_id
    );

    let reply = match command {
        Command::Join => join(ctx, msg, bot, guild_id).await,
        Command::Leave => music_reply(bot.music.leave(guild_id).await, |_| {
            "👋 Left the voice channel".to_string()
        }),
        Command::Play(query) => play(ctx, msg, bot, guild_id, &query, prefix).await,
        Command::Pause => music_reply(bot.music.pause(guild_id).await, |_| "⏸️ Paused".to_string()),
        Command::Resume => music_reply(bot.music.resume(guild_id).await, |_| "▶️ Resumed".to_string()),
        Command::Skip => music_reply(bot.music.skip(guild_id).await, |track| {
            format!("⏭️ Skipped **{}**", track.title())
        }),
        Command::Stop => music_reply(bot.music.stop(guild_id).await, |_| {
            "⏹️ Stopped playing and cleared the queue".to_string()
        }),
        Command::Queue => music_reply(bot.music.queue_snapshot(guild_id).await, |snapshot| {
            render_queue(&snapshot)
        }),
        Command::NowPlaying => music_reply(bot.music.queue_snapshot(guild_id).await, |snapshot| {
            match snapshot.current {
                Some(track) => format!("🎵 Now playing: {}", describe(&track)),
                None => "Nothing is playing right now.".to_string(),
            }
        }),
        Command::Shuffle => music_reply(bot.music.shuffle(guild_id).await, |count| match count {
            0 | 1 => "Need at least 2 songs in the queue to shuffle.".to_string(),
            n => format!("🔀 Shuffled {} songs", n),
        }),
        Command::Loop(mode) => {
            let mode = mode.unwrap_or_else(|| "off".to_string());
            music_reply(bot.music.set_loop_mode(guild_id, &mode).await, |mode| {
                format!("🔁 Loop mode set to: {}", mode)
            })
        }
        Command::Volume(arg) => volume(bot, guild_id, arg.as_deref()).await,
        Command::SetBirthday(arg) => set_birthday(msg, bot, arg.as_deref(), prefix).await,
        Command::SetBirthdayChannel(arg) => {
            match parse_channel(arg.as_deref(), msg.channel_id) {
                Some(channel_id) => {
                    bot.storage
                        .lock()
                        .await
                        .set_birthday_channel(guild_id.get(), channel_id.get())
                        .await?;
                    format!("🎂 Birthday announcements will be sent to <#{}>", channel_id)
                }
                None => "❌ Invalid channel specified.".to_string(),
            }
        }
        Command::SetBirthdayRole(arg) => match arg.as_deref().and_then(parse_role) {
            Some(role_id) => {
                bot.storage
                    .lock()
                    .await
                    .set_birthday_role(guild_id.get(), role_id.get())
                    .await?;
                format!(
                    "🎂 Birthday role set to <@&{}>. It will be assigned on members' birthdays.",
                    role_id
                )
            }
            None => format!(
                "❌ Invalid role specified. Usage: {}",
                usage(prefix, "set_birthday_role")
            ),
        },
        Command::UpcomingBirthdays(arg) => upcoming_birthdays(ctx, bot, guild_id, arg.as_deref()).await,
        Command::NextHoliday => render_next_holiday(Local::now().date_naive()),
        Command::SetHolidayChannel(arg) => {
            match parse_channel(arg.as_deref(), msg.channel_id) {
                Some(channel_id) => {
                    bot.storage
                        .lock()
                        .await
                        .set_holiday_channel(guild_id.get(), channel_id.get())
                        .await?;
                    format!("🎉 Holiday announcements will now be sent to <#{}>", channel_id)
                }
                None => "❌ Invalid channel specified.".to_string(),
            }
        }
        Command::HolidayChannel => holiday_channel(ctx, bot, guild_id, prefix).await,
        Command::ServerInfo => serverinfo(ctx, guild_id),
        Command::UserInfo(arg) => userinfo(ctx, msg, guild_id, arg.as_deref()).await,
        Command::Hello => general::HELLO.to_string(),
        Command::Invite => general::INVITE_URL.to_string(),
        Command::VaporClub => general::PLAYLIST_URL.to_string(),
        Command::Help(None) => help_text(prefix),
        Command::Help(Some(name)) => command_help(prefix, &name),
        Command::Ping => return ping(ctx, msg).await,
    };

    msg.channel_id.say(&ctx.http, reply).await?;
    Ok(())
}

// Music

async fn join(ctx: &Context, msg: &Message, bot: &HarmonyBot, guild_id: GuildId) -> String {
    let Some(channel_id) = author_voice_channel(ctx, msg, guild_id) else {
        return "❌ You're not connected to a voice channel.".to_string();
    };
    music_reply(bot.music.join(guild_id, channel_id).await, |_| {
        format!("✅ Joined <#{}>", channel_id)
    })
}

async fn play(
    ctx: &Context,
    msg: &Message,
    bot: &HarmonyBot,
    guild_id: GuildId,
    query: &str,
    prefix: &str,
) -> String {
    if query.is_empty() {
        return format!("❌ Usage: {}", usage(prefix, "play"));
    }

    // Join the author's channel first unless the bot is already in voice here
    if !bot.music.is_connected(guild_id).await {
        let Some(channel_id) = author_voice_channel(ctx, msg, guild_id) else {
            return "❌ You're not connected to a voice channel.".to_string();
        };
        if let Err(e) = bot.music.join(guild_id, channel_id).await {
            return render_error(&e);
        }
    }

    let _typing = msg.channel_id.start_typing(&ctx.http);

    music_reply(bot.music.enqueue(guild_id, query).await, |outcome| match outcome {
        EnqueueOutcome::Playing(track) => format!("🎵 Now playing: {}", describe(&track)),
        EnqueueOutcome::Queued { track, position } => {
            format!("➕ Added to queue (#{}): {}", position, describe(&track))
        }
    })
}

async fn volume(bot: &HarmonyBot, guild_id: GuildId, arg: Option<&str>) -> String {
    let Some(arg) = arg else {
        return music_reply(bot.music.queue_snapshot(guild_id).await, |snapshot| {
            format!("🔊 Volume is {}%", snapshot.volume.percent())
        });
    };
    let Ok(percent) = arg.trim_end_matches('%').parse::<i64>() else {
        return "❌ Volume must be a number between 0 and 100.".to_string();
    };
    music_reply(bot.music.set_volume(guild_id, percent).await, |volume| {
        format!("🔊 Volume set to {}%", volume.percent())
    })
}

fn author_voice_channel(ctx: &Context, msg: &Message, guild_id: GuildId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|state| state.channel_id)
}

fn music_reply<T>(result: Result<T, MusicError>, render: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => render(value),
        Err(e) => render_error(&e),
    }
}

pub fn render_error(error: &MusicError) -> String {
    match error {
        MusicError::NotConnected => "❌ I'm not connected to a voice channel.".to_string(),
        other => format!("❌ {}", other),
    }
}

fn describe(track: &TrackDescriptor) -> String {
    match track.duration() {
        Some(duration) => format!("**{}** ({})", track.title(), format_duration(duration)),
        None => format!("**{}**", track.title()),
    }
}

pub fn render_queue(snapshot: &QueueSnapshot) -> String {
    let Some(current) = &snapshot.current else {
        return "Nothing is playing right now.".to_string();
    };

    let mut lines = vec![format!("🎵 **Now playing:** {}", describe(current))];

    if snapshot.upcoming.is_empty() {
        lines.push("📭 Nothing queued".to_string());
    } else {
        lines.push(format!("📜 **Up next** ({} songs):", snapshot.upcoming.len()));
        for (index, track) in snapshot.upcoming.iter().take(QUEUE_PAGE).enumerate() {
            lines.push(format!("`{}.` {}", index + 1, describe(track)));
        }
        if snapshot.upcoming.len() > QUEUE_PAGE {
            lines.push(format!("...and {} more", snapshot.upcoming.len() - QUEUE_PAGE));
        }
    }

    lines.push(format!(
        "🔁 Loop: {} | 🔊 Volume: {}%",
        snapshot.loop_mode,
        snapshot.volume.percent()
    ));
    lines.join("\n")
}

// Birthdays

async fn set_birthday(msg: &Message, bot: &HarmonyBot, arg: Option<&str>, prefix: &str) -> String {
    let Some(arg) = arg else {
        return format!(
            "❌ Usage: {} (e.g. 12-25 for December 25th)",
            usage(prefix, "setbirthday")
        );
    };

    let birthday = match arg.parse::<Birthday>() {
        Ok(birthday) => birthday,
        Err(e) => return format!("❌ {}", e),
    };

    match bot
        .storage
        .lock()
        .await
        .set_birthday(msg.author.id.get(), birthday)
        .await
    {
        Ok(()) => format!(
            "🎂 Your birthday has been set to {}! You will receive birthday wishes on your special day!",
            birthday.long_form()
        ),
        Err(e) => {
            warn!("Error storing birthday for {}: {}", msg.author.id, e);
            "❌ Could not save your birthday, please try again later.".to_string()
        }
    }
}

async fn upcoming_birthdays(ctx: &Context, bot: &HarmonyBot, guild_id: GuildId, arg: Option<&str>) -> String {
    let Some(days) = birthday::parse_lookahead(arg) else {
        return "❌ Please specify a number of days between 1 and 365.".to_string();
    };

    let birthdays = bot.storage.lock().await.birthdays();
    let today = Local::now().date_naive();
    let upcoming = birthday::upcoming(birthdays, today, days);

    let mut lines = vec![format!("🎂 **Upcoming Birthdays (next {} days)**", days)];
    for entry in &upcoming {
        // Only members of this guild are listed
        let Ok(member) = guild_id.member(ctx, entry.user_id).await else {
            continue;
        };
        lines.push(format!(
            "• **{}**: {} ({})",
            member.display_name(),
            entry.birthday.long_form(),
            entry.when()
        ));
    }

    if lines.len() == 1 {
        return format!("No upcoming birthdays in the next {} days.", days);
    }
    lines.join("\n")
}

// Holidays

pub fn render_next_holiday(today: chrono::NaiveDate) -> String {
    match next_holiday(today) {
        Some((holiday, date)) => {
            let days = (date - today).num_days();
            let when = match days {
                0 => "today!".to_string(),
                1 => "tomorrow!".to_string(),
                n => format!("in {} days", n),
            };
            format!(
                "{emoji} **{}** is {} ({})\n{emoji} {emoji} {emoji}",
                holiday.name,
                when,
                date.format("%B %d, %Y"),
                emoji = holiday.emoji
            )
        }
        None => "No holidays configured.".to_string(),
    }
}

async fn holiday_channel(ctx: &Context, bot: &HarmonyBot, guild_id: GuildId, prefix: &str) -> String {
    let configured = bot
        .storage
        .lock()
        .await
        .guild_settings(guild_id.get())
        .holiday_channel_id;

    match configured {
        Some(channel_id) => {
            let exists = guild_id
                .channels(&ctx.http)
                .await
                .map(|channels| channels.contains_key(&ChannelId::new(channel_id)))
                .unwrap_or(false);
            if exists {
                format!("🎉 Holiday announcements are being sent to <#{}>", channel_id)
            } else {
                format!(
                    "The configured holiday channel no longer exists. \
                     Please set a new one with {}",
                    usage(prefix, "set_holiday_channel")
                )
            }
        }
        None => format!(
            "No holiday channel has been set. Announcements will be sent to the general \
             channel if available, or the system channel as a fallback. \
             Use {} to set a specific channel.",
            usage(prefix, "set_holiday_channel")
        ),
    }
}

// General

fn serverinfo(ctx: &Context, guild_id: GuildId) -> String {
    let Some(guild) = guild_id.to_guild_cached(&ctx.cache) else {
        return "❌ Server information is not available yet, try again shortly.".to_string();
    };
    general::ServerSummary::from_guild(&guild).render()
}

async fn userinfo(ctx: &Context, msg: &Message, guild_id: GuildId, arg: Option<&str>) -> String {
    let user_id = match arg {
        None => msg.author.id,
        Some(arg) => match parse_id(&USER_ARG, arg) {
            Some(id) => UserId::new(id),
            None => return "❌ Invalid member specified.".to_string(),
        },
    };

    let member = match guild_id.member(ctx, user_id).await {
        Ok(member) => member,
        Err(e) => {
            warn!("Error fetching member {} in guild {}: {:?}", user_id, guild_id, e);
            return "❌ That member is not in this server.".to_string();
        }
    };

    let mut roles = member.roles.clone();
    if let Some(guild) = guild_id.to_guild_cached(&ctx.cache) {
        roles.sort_by_key(|role| {
            std::cmp::Reverse(guild.roles.get(role).map(|role| role.position).unwrap_or(0))
        });
    }

    general::MemberSummary::new(&member, roles).render()
}

async fn ping(ctx: &Context, msg: &Message) -> Result<()> {
    let started = Instant::now();
    let mut reply = msg.channel_id.say(&ctx.http, "🏓 Pong!").await?;
    let elapsed = started.elapsed().as_millis();
    reply
        .edit(ctx, EditMessage::new().content(format!("🏓 Pong! ({} ms)", elapsed)))
        .await?;
    Ok(())
}

/// Channel argument as a mention or raw id; defaults to `fallback` when absent.
fn parse_channel(arg: Option<&str>, fallback: ChannelId) -> Option<ChannelId> {
    match arg {
        None => Some(fallback),
        Some(arg) => parse_id(&CHANNEL_ARG, arg).map(ChannelId::new),
    }
}

fn parse_role(arg: &str) -> Option<RoleId> {
    parse_id(&ROLE_ARG, arg).map(RoleId::new)
}

fn parse_id(pattern: &Regex, arg: &str) -> Option<u64> {
    let captures = pattern.captures(arg.trim())?;
    captures
        .get(1)
        .or_else(|| captures.get(2))?
        .as_str()
        .parse()
        .ok()
        .filter(|id| *id != 0)
}
