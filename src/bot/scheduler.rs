//! Periodic calendar tasks: birthday announcements, birthday role rotation
//! and holiday announcements. Spawned once, after the gateway is ready.

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use serenity::{
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId, RoleId, UserId},
    },
    prelude::Context,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    calendar::{birthday, AnnouncementTracker, Holiday},
    config::Config,
    storage::JsonStorage,
};

pub fn spawn_calendar_tasks(ctx: Context, storage: Arc<Mutex<JsonStorage>>, config: &Config) {
    let birthday_every = Duration::from_secs(config.birthday_check_interval_secs);
    let roles_every = Duration::from_secs(config.role_check_interval_secs);
    let holidays_every = Duration::from_secs(config.holiday_check_interval_secs);

    {
        let (ctx, storage) = (ctx.clone(), storage.clone());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(birthday_every);
            loop {
                interval.tick().await;
                announce_birthdays(&ctx, &storage, Local::now().date_naive()).await;
            }
        });
    }

    {
        let (ctx, storage) = (ctx.clone(), storage.clone());
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(roles_every);
            loop {
                interval.tick().await;
                rotate_birthday_roles(&ctx, &storage, Local::now().date_naive()).await;
            }
        });
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(holidays_every);
        let mut tracker = AnnouncementTracker::default();
        loop {
            interval.tick().await;
            for holiday in tracker.due(Local::now().date_naive()) {
                announce_holiday(&ctx, &storage, holiday).await;
            }
        }
    });

    info!("📅 Calendar tasks started");
}

async fn announce_birthdays(ctx: &Context, storage: &Mutex<JsonStorage>, today: NaiveDate) {
    let (celebrants, channels) = {
        let storage = storage.lock().await;
        let channels: Vec<(GuildId, ChannelId)> = ctx
            .cache
            .guilds()
            .into_iter()
            .filter_map(|guild_id| {
                storage
                    .guild_settings(guild_id.get())
                    .birthday_channel_id
                    .map(|channel| (guild_id, ChannelId::new(channel)))
            })
            .collect();
        (storage.birthdays_on(today), channels)
    };

    if celebrants.is_empty() {
        debug!("No birthdays on {}", today);
        return;
    }

    for (guild_id, channel_id) in channels {
        for user_id in &celebrants {
            // Members of other guilds are not announced here
            if guild_id.member(ctx, UserId::new(*user_id)).await.is_err() {
                continue;
            }

            let text = format!(
                "🎉 **Happy Birthday!** Everyone wish <@{}> a happy birthday!\n{}",
                user_id,
                birthday::random_wish()
            );
            if let Err(e) = channel_id.say(&ctx.http, text).await {
                warn!("Error announcing birthday in guild {}: {:?}", guild_id, e);
            }
        }
    }
}

async fn rotate_birthday_roles(ctx: &Context, storage: &Mutex<JsonStorage>, today: NaiveDate) {
    let yesterday = today - ChronoDuration::days(1);

    let (remove, add, roles) = {
        let storage = storage.lock().await;
        let (remove, add) = role_changes(&storage.birthdays_on(yesterday), &storage.birthdays_on(today));
        let roles: Vec<(GuildId, RoleId)> = ctx
            .cache
            .guilds()
            .into_iter()
            .filter_map(|guild_id| {
                storage
                    .guild_settings(guild_id.get())
                    .birthday_role_id
                    .map(|role| (guild_id, RoleId::new(role)))
            })
            .collect();
        (remove, add, roles)
    };

    for (guild_id, role_id) in roles {
        for user_id in &remove {
            if let Ok(member) = guild_id.member(ctx, UserId::new(*user_id)).await {
                if member.roles.contains(&role_id) {
                    if let Err(e) = member.remove_role(&ctx.http, role_id).await {
                        warn!("Error removing birthday role from {}: {:?}", user_id, e);
                    }
                }
            }
        }

        for user_id in &add {
            if let Ok(member) = guild_id.member(ctx, UserId::new(*user_id)).await {
                if !member.roles.contains(&role_id) {
                    match member.add_role(&ctx.http, role_id).await {
                        Ok(()) => info!("🎂 Birthday role granted to {} in guild {}", user_id, guild_id),
                        Err(e) => warn!("Error granting birthday role to {}: {:?}", user_id, e),
                    }
                }
            }
        }
    }
}

async fn announce_holiday(ctx: &Context, storage: &Mutex<JsonStorage>, holiday: &Holiday) {
    info!("🎉 Announcing {}", holiday.name);

    for guild_id in ctx.cache.guilds() {
        let configured = storage
            .lock()
            .await
            .guild_settings(guild_id.get())
            .holiday_channel_id
            .map(ChannelId::new);

        let Some(channel_id) = holiday_channel_for(ctx, guild_id, configured).await else {
            debug!("No channel to announce {} in guild {}", holiday.name, guild_id);
            continue;
        };

        if let Err(e) = channel_id.say(&ctx.http, holiday.announcement()).await {
            error!("Error sending holiday message in guild {}: {:?}", guild_id, e);
        }
    }
}

/// Configured channel if it still exists, else a text channel named
/// `general`, else the system channel.
async fn holiday_channel_for(
    ctx: &Context,
    guild_id: GuildId,
    configured: Option<ChannelId>,
) -> Option<ChannelId> {
    let channels = guild_id.channels(&ctx.http).await.ok()?;

    let configured = configured.filter(|id| channels.contains_key(id));
    let general = channels
        .values()
        .find(|channel| channel.kind == ChannelType::Text && channel.name == "general")
        .map(|channel| channel.id);
    let system = guild_id
        .to_guild_cached(&ctx.cache)
        .and_then(|guild| guild.system_channel_id);

    configured.or(general).or(system)
}

/// Who loses and who gains the birthday role. A member celebrating on both
/// days keeps it.
fn role_changes(yesterday: &[u64], today: &[u64]) -> (Vec<u64>, Vec<u64>) {
    let remove = yesterday
        .iter()
        .filter(|user| !today.contains(user))
        .copied()
        .collect();
    (remove, today.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_changes() {
        let (remove, add) = role_changes(&[1, 2], &[2, 3]);
        assert_eq!(remove, vec![1]);
        assert_eq!(add, vec![2, 3]);

        let (remove, add) = role_changes(&[], &[]);
        assert!(remove.is_empty() && add.is_empty());
    }
}
