use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::calendar::Birthday;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Per-guild announcement configuration, stored in `servers/guild_<id>.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildSettings {
    pub guild_id: u64,
    #[serde(default)]
    pub birthday_channel_id: Option<u64>,
    #[serde(default)]
    pub birthday_role_id: Option<u64>,
    #[serde(default)]
    pub holiday_channel_id: Option<u64>,
}

/// JSON-file backed store for guild settings and member birthdays.
///
/// Everything is loaded at startup and kept in memory; every write goes
/// straight to disk. Callers share it as `Arc<tokio::sync::Mutex<JsonStorage>>`.
pub struct JsonStorage {
    data_dir: PathBuf,
    guilds: HashMap<u64, GuildSettings>,
    birthdays: BTreeMap<u64, Birthday>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> StorageResult<Self> {
        fs::create_dir_all(data_dir.join("servers")).await?;

        let mut storage = Self {
            data_dir,
            guilds: HashMap::new(),
            birthdays: BTreeMap::new(),
        };

        storage.load_all_guilds().await?;
        storage.load_birthdays().await?;

        info!(
            "📁 Storage ready in {} ({} guilds, {} birthdays)",
            storage.data_dir.display(),
            storage.guilds.len(),
            storage.birthdays.len()
        );

        Ok(storage)
    }

    /// Settings for a guild; defaults when nothing was configured.
    pub fn guild_settings(&self, guild_id: u64) -> GuildSettings {
        self.guilds.get(&guild_id).cloned().unwrap_or(GuildSettings {
            guild_id,
            ..GuildSettings::default()
        })
    }

    pub async fn set_birthday_channel(&mut self, guild_id: u64, channel_id: u64) -> StorageResult<()> {
        self.update_guild(guild_id, |settings| settings.birthday_channel_id = Some(channel_id))
            .await
    }

    pub async fn set_birthday_role(&mut self, guild_id: u64, role_id: u64) -> StorageResult<()> {
        self.update_guild(guild_id, |settings| settings.birthday_role_id = Some(role_id))
            .await
    }

    pub async fn set_holiday_channel(&mut self, guild_id: u64, channel_id: u64) -> StorageResult<()> {
        self.update_guild(guild_id, |settings| settings.holiday_channel_id = Some(channel_id))
            .await
    }

    /// Stores (or replaces) a member's birthday.
    pub async fn set_birthday(&mut self, user_id: u64, birthday: Birthday) -> StorageResult<()> {
        self.birthdays.insert(user_id, birthday);
        self.save_birthdays().await?;
        info!("🎂 Birthday for user {} set to {}", user_id, birthday);
        Ok(())
    }

    pub fn birthday(&self, user_id: u64) -> Option<Birthday> {
        self.birthdays.get(&user_id).copied()
    }

    pub fn birthdays(&self) -> Vec<(u64, Birthday)> {
        self.birthdays.iter().map(|(user, birthday)| (*user, *birthday)).collect()
    }

    /// Users whose birthday is celebrated on `date`.
    pub fn birthdays_on(&self, date: chrono::NaiveDate) -> Vec<u64> {
        self.birthdays
            .iter()
            .filter(|(_, birthday)| birthday.falls_on(date))
            .map(|(user, _)| *user)
            .collect()
    }

    // Private helpers

    async fn update_guild<F>(&mut self, guild_id: u64, update: F) -> StorageResult<()>
    where
        F: FnOnce(&mut GuildSettings),
    {
        let mut settings = self.guild_settings(guild_id);
        update(&mut settings);
        write_json(&self.guild_file_path(guild_id), &settings).await?;
        self.guilds.insert(guild_id, settings);
        debug!("💾 Settings saved for guild {}", guild_id);
        Ok(())
    }

    async fn load_all_guilds(&mut self) -> StorageResult<()> {
        let mut files = fs::read_dir(self.data_dir.join("servers")).await?;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            let Some(guild_id) = path
                .file_stem()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix("guild_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match read_json::<GuildSettings>(&path).await {
                Ok(settings) => {
                    self.guilds.insert(guild_id, settings);
                }
                Err(e) => warn!("Error loading settings for guild {}: {}", guild_id, e),
            }
        }

        Ok(())
    }

    async fn load_birthdays(&mut self) -> StorageResult<()> {
        let path = self.birthdays_file_path();
        if fs::try_exists(&path).await? {
            self.birthdays = read_json(&path).await?;
        }
        Ok(())
    }

    async fn save_birthdays(&self) -> StorageResult<()> {
        write_json(&self.birthdays_file_path(), &self.birthdays).await
    }

    fn guild_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir
            .join("servers")
            .join(format!("guild_{}.json", guild_id))
    }

    fn birthdays_file_path(&self) -> PathBuf {
        self.data_dir.join("birthdays.json")
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<T> {
    let content = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

/// Writes through a temporary file so a crash never leaves half a document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_guild_settings_default_and_persist() {
        let dir = TempDir::new().unwrap();
        let mut storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        assert_eq!(
            storage.guild_settings(7),
            GuildSettings {
                guild_id: 7,
                ..GuildSettings::default()
            }
        );

        storage.set_birthday_channel(7, 70).await.unwrap();
        storage.set_birthday_role(7, 700).await.unwrap();
        storage.set_holiday_channel(7, 71).await.unwrap();

        let reloaded = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        let settings = reloaded.guild_settings(7);
        assert_eq!(settings.birthday_channel_id, Some(70));
        assert_eq!(settings.birthday_role_id, Some(700));
        assert_eq!(settings.holiday_channel_id, Some(71));
        assert!(dir.path().join("servers/guild_7.json").exists());
    }

    #[tokio::test]
    async fn test_birthdays_persist_and_replace() {
        let dir = TempDir::new().unwrap();
        let mut storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();

        storage.set_birthday(1, "12-25".parse().unwrap()).await.unwrap();
        storage.set_birthday(2, "02-29".parse().unwrap()).await.unwrap();
        storage.set_birthday(1, "12-24".parse().unwrap()).await.unwrap();

        let reloaded = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(reloaded.birthday(1).unwrap().to_string(), "12-24");
        assert_eq!(reloaded.birthdays().len(), 2);

        let feb_28 = NaiveDate::from_ymd_opt(2026, 2, 28).unwrap();
        assert_eq!(reloaded.birthdays_on(feb_28), vec![2]);
    }

    #[tokio::test]
    async fn test_corrupt_guild_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("servers")).unwrap();
        std::fs::write(dir.path().join("servers/guild_9.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("servers/notes.txt"), "ignored").unwrap();

        let storage = JsonStorage::new(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(storage.guild_settings(9).birthday_channel_id, None);
    }
}
