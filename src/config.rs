use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{session::SessionSettings, Volume};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub idle_timeout_secs: u64,

    // Limits
    pub max_song_duration: u64, // seconds

    // Paths
    pub data_dir: PathBuf,

    // Calendar scans
    pub birthday_check_interval_secs: u64,
    pub role_check_interval_secs: u64,
    pub holiday_check_interval_secs: u64,
}

impl Config {
    /// Loads `.env` (if present), then reads environment variables over the defaults.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            command_prefix: std::env::var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            idle_timeout_secs: env_or("IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,

            max_song_duration: env_or("MAX_SONG_DURATION", defaults.max_song_duration)?,

            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),

            birthday_check_interval_secs: env_or(
                "BIRTHDAY_CHECK_INTERVAL_SECS",
                defaults.birthday_check_interval_secs,
            )?,
            role_check_interval_secs: env_or(
                "ROLE_CHECK_INTERVAL_SECS",
                defaults.role_check_interval_secs,
            )?,
            holiday_check_interval_secs: env_or(
                "HOLIDAY_CHECK_INTERVAL_SECS",
                defaults.holiday_check_interval_secs,
            )?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks that catch common `.env` mistakes at startup.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN must not be empty");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 1.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_song_duration == 0 {
            anyhow::bail!("Max song duration must be greater than 0");
        }

        if self.idle_timeout_secs == 0 {
            anyhow::bail!("Idle timeout must be greater than 0");
        }

        for (name, secs) in [
            ("Birthday check interval", self.birthday_check_interval_secs),
            ("Role check interval", self.role_check_interval_secs),
            ("Holiday check interval", self.holiday_check_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }

    /// Settings handed to every music session.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            max_queue_size: self.max_queue_size,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            default_volume: Volume::new(self.default_volume),
        }
    }

    /// One-line summary for the startup log. Never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "prefix '{}', {}% vol, queue {} tracks, idle {}s, max {}s per track, data in {}",
            self.command_prefix,
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.idle_timeout_secs,
            self.max_song_duration,
            self.data_dir.display()
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            default_volume: 0.5,
            max_queue_size: 500,
            idle_timeout_secs: 180,

            max_song_duration: 3600, // 1 hour

            data_dir: "./data".into(),

            birthday_check_interval_secs: 24 * 60 * 60,
            role_check_interval_secs: 60 * 60,
            holiday_check_interval_secs: 5 * 60 * 60,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, value)),
        _ => Ok(default),
    }
}
