//! Runtime settings editable from chat commands, persisted as YAML.
//!
//! Unlike [`crate::config::DaiaConfig`] (read once at startup), these values
//! change while the bot runs: allow-lists, presence text, timezone, and the
//! history window. One [`RuntimeSettings`] is shared by `Arc` between the
//! message handler, the pipeline and the command layer.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{DaiaError, Result};

pub const MAX_ACTIVITY_CHARS: usize = 128;
pub const MAX_HISTORY_LIMIT: u32 = 100;

const FILE_HEADER: &str = "# Runtime configuration, edited through the bot's admin commands.\n\
# The bot rewrites this file whenever a setting changes.\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMeta {
    pub server: String,
    pub channel: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMeta {
    pub username: String,
}

/// On-disk shape of the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsData {
    #[serde(default)]
    pub allowed_channels: Vec<u64>,
    #[serde(default)]
    pub allowed_users: Vec<u64>,
    #[serde(default)]
    pub channel_metadata: BTreeMap<String, ChannelMeta>,
    #[serde(default)]
    pub user_metadata: BTreeMap<String, UserMeta>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_activity")]
    pub discord_activity: String,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            allowed_channels: Vec::new(),
            allowed_users: Vec::new(),
            channel_metadata: BTreeMap::new(),
            user_metadata: BTreeMap::new(),
            timezone: default_timezone(),
            discord_activity: default_activity(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_activity() -> String {
    "Surfing".to_string()
}
fn default_history_limit() -> u32 {
    12
}

/// Mutex-guarded settings with write-through persistence.
///
/// Every mutation holds the lock across read-modify-write-save so two
/// concurrent admin commands cannot lose each other's change.
pub struct RuntimeSettings {
    path: PathBuf,
    data: Mutex<SettingsData>,
}

impl RuntimeSettings {
    /// Load settings from `path`, writing a default file if none exists.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            read_file(&path)?
        } else {
            let data = SettingsData::default();
            write_file(&path, &data)?;
            info!(path = %path.display(), "created default runtime settings");
            data
        };

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// In-memory settings with no backing file. Writes are kept in memory only.
    pub fn in_memory(data: SettingsData) -> Self {
        Self {
            path: PathBuf::new(),
            data: Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, SettingsData> {
        // A panic while holding the lock leaves the data itself intact.
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &SettingsData) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        write_file(&self.path, data)
    }

    /// Snapshot of the whole settings document.
    pub fn snapshot(&self) -> SettingsData {
        self.lock().clone()
    }

    // ── read accessors ──

    pub fn allowed_channels(&self) -> BTreeSet<u64> {
        self.lock().allowed_channels.iter().copied().collect()
    }

    pub fn allowed_users(&self) -> BTreeSet<u64> {
        self.lock().allowed_users.iter().copied().collect()
    }

    pub fn is_channel_allowed(&self, channel_id: u64) -> bool {
        self.lock().allowed_channels.contains(&channel_id)
    }

    /// DMs are open to everyone while the user allow-list is empty.
    pub fn is_dm_allowed(&self, user_id: u64) -> bool {
        let data = self.lock();
        data.allowed_users.is_empty() || data.allowed_users.contains(&user_id)
    }

    pub fn timezone(&self) -> String {
        self.lock().timezone.clone()
    }

    /// The configured timezone. A hand-edited value that names no known zone
    /// falls back to UTC with a warning.
    pub fn tz(&self) -> Tz {
        let name = self.timezone();
        name.parse().unwrap_or_else(|_| {
            warn!(timezone = %name, "unknown timezone in runtime settings, using UTC");
            Tz::UTC
        })
    }

    pub fn activity(&self) -> String {
        self.lock().discord_activity.clone()
    }

    pub fn history_limit(&self) -> u32 {
        self.lock().history_limit
    }

    pub fn channel_meta(&self, channel_id: u64) -> Option<ChannelMeta> {
        self.lock()
            .channel_metadata
            .get(&channel_id.to_string())
            .cloned()
    }

    pub fn user_meta(&self, user_id: u64) -> Option<UserMeta> {
        self.lock().user_metadata.get(&user_id.to_string()).cloned()
    }

    // ── write accessors ──

    /// Apply `change` to a copy of the settings and swap it in only after the
    /// copy was written, so a failed write leaves memory and disk in step.
    /// `change` returns its result plus whether anything changed.
    fn update<T>(&self, change: impl FnOnce(&mut SettingsData) -> (T, bool)) -> Result<T> {
        let mut data = self.lock();
        let mut next = data.clone();
        let (out, dirty) = change(&mut next);
        if dirty {
            self.persist(&next)?;
            *data = next;
        }
        Ok(out)
    }

    /// Returns `true` if the channel was newly added. Metadata is refreshed
    /// either way.
    pub fn add_channel(&self, channel_id: u64, meta: Option<ChannelMeta>) -> Result<bool> {
        self.update(|data| {
            let has_meta = meta.is_some();
            if let Some(meta) = meta {
                data.channel_metadata.insert(channel_id.to_string(), meta);
            }
            let added = !data.allowed_channels.contains(&channel_id);
            if added {
                data.allowed_channels.push(channel_id);
            }
            (added, added || has_meta)
        })
    }

    pub fn remove_channel(&self, channel_id: u64) -> Result<bool> {
        self.update(|data| {
            let before = data.allowed_channels.len();
            data.allowed_channels.retain(|id| *id != channel_id);
            let removed = data.allowed_channels.len() != before;
            if removed {
                data.channel_metadata.remove(&channel_id.to_string());
            }
            (removed, removed)
        })
    }

    pub fn add_user(&self, user_id: u64, username: Option<String>) -> Result<bool> {
        self.update(|data| {
            let has_meta = username.is_some();
            if let Some(username) = username {
                data.user_metadata
                    .insert(user_id.to_string(), UserMeta { username });
            }
            let added = !data.allowed_users.contains(&user_id);
            if added {
                data.allowed_users.push(user_id);
            }
            (added, added || has_meta)
        })
    }

    pub fn remove_user(&self, user_id: u64) -> Result<bool> {
        self.update(|data| {
            let before = data.allowed_users.len();
            data.allowed_users.retain(|id| *id != user_id);
            let removed = data.allowed_users.len() != before;
            if removed {
                data.user_metadata.remove(&user_id.to_string());
            }
            (removed, removed)
        })
    }

    /// Accepts IANA zone names such as `Asia/Tokyo`, plus `UTC`.
    pub fn set_timezone(&self, timezone: &str) -> Result<()> {
        let timezone = timezone.trim();
        let tz: Tz = timezone.parse().map_err(|_| DaiaError::InvalidSetting {
            key: "timezone",
            reason: format!("'{timezone}' is not a known timezone name like Europe/Paris"),
        })?;
        self.update(|data| {
            data.timezone = tz.name().to_string();
            ((), true)
        })
    }

    pub fn set_activity(&self, activity: &str) -> Result<()> {
        let activity = activity.trim();
        if activity.is_empty() || activity.chars().count() > MAX_ACTIVITY_CHARS {
            return Err(DaiaError::InvalidSetting {
                key: "discord_activity",
                reason: format!("must be 1 to {MAX_ACTIVITY_CHARS} characters"),
            });
        }
        self.update(|data| {
            data.discord_activity = activity.to_string();
            ((), true)
        })
    }

    pub fn set_history_limit(&self, limit: u32) -> Result<()> {
        if limit == 0 || limit > MAX_HISTORY_LIMIT {
            return Err(DaiaError::InvalidSetting {
                key: "history_limit",
                reason: format!("must be between 1 and {MAX_HISTORY_LIMIT}"),
            });
        }
        self.update(|data| {
            data.history_limit = limit;
            ((), true)
        })
    }

    /// Replace display metadata for many channels and users in one write.
    pub fn update_metadata(
        &self,
        channels: impl IntoIterator<Item = (u64, ChannelMeta)>,
        users: impl IntoIterator<Item = (u64, UserMeta)>,
    ) -> Result<usize> {
        self.update(|data| {
            let mut updated = 0;
            for (id, meta) in channels {
                data.channel_metadata.insert(id.to_string(), meta);
                updated += 1;
            }
            for (id, meta) in users {
                data.user_metadata.insert(id.to_string(), meta);
                updated += 1;
            }
            (updated, updated > 0)
        })
    }

    /// Re-read the backing file, discarding in-memory state.
    pub fn reload(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        let fresh = read_file(&self.path)?;
        *self.lock() = fresh;
        debug!(path = %self.path.display(), "runtime settings reloaded");
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<SettingsData> {
    let raw = std::fs::read_to_string(path)?;
    if raw.trim().is_empty() {
        return Ok(SettingsData::default());
    }
    serde_yaml::from_str(&raw).map_err(|e| DaiaError::Settings {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn write_file(path: &Path, data: &SettingsData) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_yaml::to_string(data)?;
    std::fs::write(path, format!("{FILE_HEADER}{body}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings() -> (tempfile::TempDir, RuntimeSettings) {
        let dir = tempfile::tempdir().unwrap();
        let settings = RuntimeSettings::load(dir.path().join("config/runtime.yml")).unwrap();
        (dir, settings)
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let (dir, settings) = temp_settings();
        assert!(dir.path().join("config/runtime.yml").exists());
        assert_eq!(settings.history_limit(), 12);
        assert_eq!(settings.activity(), "Surfing");
        assert_eq!(settings.timezone(), "UTC");
        assert!(settings.allowed_channels().is_empty());
    }

    #[test]
    fn changes_survive_reload_from_disk() {
        let (dir, settings) = temp_settings();
        assert!(settings
            .add_channel(
                42,
                Some(ChannelMeta {
                    server: "Guild".into(),
                    channel: "general".into()
                })
            )
            .unwrap());
        assert!(settings.add_user(7, Some("alice".into())).unwrap());
        settings.set_history_limit(30).unwrap();
        settings.set_timezone("Asia/Tokyo").unwrap();

        let reopened = RuntimeSettings::load(dir.path().join("config/runtime.yml")).unwrap();
        assert!(reopened.is_channel_allowed(42));
        assert_eq!(reopened.channel_meta(42).unwrap().channel, "general");
        assert_eq!(reopened.user_meta(7).unwrap().username, "alice");
        assert_eq!(reopened.history_limit(), 30);
        assert_eq!(reopened.tz(), Tz::Asia__Tokyo);
        assert_eq!(reopened.timezone(), "Asia/Tokyo");
    }

    #[test]
    fn add_twice_reports_existing() {
        let (_dir, settings) = temp_settings();
        assert!(settings.add_channel(1, None).unwrap());
        assert!(!settings.add_channel(1, None).unwrap());
        assert!(settings.remove_channel(1).unwrap());
        assert!(!settings.remove_channel(1).unwrap());
    }

    #[test]
    fn empty_user_list_allows_all_dms() {
        let settings = RuntimeSettings::in_memory(SettingsData::default());
        assert!(settings.is_dm_allowed(5));
        settings.add_user(6, None).unwrap();
        assert!(!settings.is_dm_allowed(5));
        assert!(settings.is_dm_allowed(6));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let settings = RuntimeSettings::in_memory(SettingsData::default());
        assert!(settings.set_history_limit(0).is_err());
        assert!(settings.set_history_limit(MAX_HISTORY_LIMIT + 1).is_err());
        assert!(settings.set_timezone("Mars/Olympus").is_err());
        assert!(settings.set_activity(&"x".repeat(129)).is_err());
        assert!(settings.set_activity("   ").is_err());
        assert_eq!(settings.history_limit(), 12);
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let (dir, settings) = temp_settings();
        let path = dir.path().join("config/runtime.yml");
        std::fs::write(&path, "history_limit: 5\ndiscord_activity: Reading\n").unwrap();

        settings.reload().unwrap();
        assert_eq!(settings.history_limit(), 5);
        assert_eq!(settings.activity(), "Reading");
        assert_eq!(settings.timezone(), "UTC");
    }

    #[test]
    fn zone_names_are_validated() {
        let settings = RuntimeSettings::in_memory(SettingsData::default());
        assert_eq!(settings.tz(), Tz::UTC);
        settings.set_timezone(" America/New_York ").unwrap();
        assert_eq!(settings.timezone(), "America/New_York");
        assert_eq!(settings.tz(), Tz::America__New_York);
        assert!(settings.set_timezone("+09:00").is_err());
        assert!(settings.set_timezone("").is_err());
        assert_eq!(settings.timezone(), "America/New_York");
    }

    #[test]
    fn unknown_stored_zone_falls_back_to_utc() {
        let settings = RuntimeSettings::in_memory(SettingsData {
            timezone: "Atlantis/Capital".into(),
            ..SettingsData::default()
        });
        assert_eq!(settings.tz(), Tz::UTC);
    }

    #[test]
    fn failed_write_keeps_previous_values() {
        let (dir, settings) = temp_settings();
        let config_dir = dir.path().join("config");
        std::fs::remove_dir_all(&config_dir).unwrap();
        std::fs::write(&config_dir, "not a directory").unwrap();

        assert!(settings.set_history_limit(30).is_err());
        assert!(settings.add_channel(42, None).is_err());
        assert!(settings.set_timezone("Asia/Tokyo").is_err());

        assert_eq!(settings.history_limit(), 12);
        assert!(!settings.is_channel_allowed(42));
        assert_eq!(settings.timezone(), "UTC");
    }
}
