//! Configuration management for labsync.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.
//!
//! The refresh margins (current-session lookahead and fetch backdate) are
//! deliberately configuration rather than constants; the defaults mirror the
//! deployed kiosk behavior but have never been validated against real
//! scheduling data.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "labsync";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "attendance.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `LABSYNC_`)
/// 2. TOML config file at `~/.config/labsync/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend API configuration.
    pub backend: BackendConfig,
    /// Sync timing configuration.
    pub sync: SyncConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Lab roster configuration.
    pub labs: LabsConfig,
}

/// Backend-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the attendance API.
    pub base_url: String,
    /// Bearer token attached to every backend request, if set.
    pub auth_token: Option<String>,
    /// Hard per-request timeout in seconds; a request past this bound is
    /// aborted and treated as a network failure.
    pub request_timeout_secs: u64,
}

/// Sync-timing configuration.
///
/// All times are wall-clock on the kiosk terminal; the deployment runs in a
/// single fixed timezone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How far ahead of `now` a session may start and still count as
    /// "current" (students arriving early still see their session).
    pub lookahead_minutes: u32,
    /// How far behind `now` the fetch window starts, so sessions already
    /// under way are included in a fresh fetch.
    pub fetch_margin_minutes: u32,
    /// Steady-state refresh interval in seconds.
    pub refresh_interval_secs: u64,
    /// Clock-boundary granularity in minutes; the second refresh after
    /// startup is aligned to the next such mark.
    pub boundary_minutes: u32,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/labsync/attendance.db`
    pub database_path: Option<PathBuf>,
}

/// Lab roster: which rooms belong to which lab.
///
/// The permission check and the all-rooms refresh both consult this map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabsConfig {
    /// Upper-case lab name to its room numbers.
    pub rooms: HashMap<String, Vec<u16>>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/api/v1".to_string(),
            auth_token: None,
            request_timeout_secs: 8,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookahead_minutes: 30,
            fetch_margin_minutes: 30,
            refresh_interval_secs: 120,
            boundary_minutes: 30,
        }
    }
}

impl Default for LabsConfig {
    fn default() -> Self {
        Self {
            rooms: default_lab_rooms(),
        }
    }
}

/// The deployment's known labs and their rooms.
fn default_lab_rooms() -> HashMap<String, Vec<u16>> {
    HashMap::from([
        ("HPL".to_string(), vec![1, 2]),
        ("HWLAB1".to_string(), vec![1, 2]),
        ("HWLAB2".to_string(), vec![1, 2, 3, 4]),
        ("HWLAB3".to_string(), vec![1, 2]),
        ("SPL".to_string(), vec![1, 2]),
        ("SWLAB1".to_string(), vec![1, 2]),
        ("SWLAB2".to_string(), vec![1, 2]),
        ("SWLAB3".to_string(), vec![1, 2, 3]),
    ])
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `LABSYNC_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("LABSYNC_").split("_"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "backend.base_url must not be empty".to_string(),
            });
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "backend.request_timeout_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.refresh_interval_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "sync.refresh_interval_secs must be greater than 0".to_string(),
            });
        }

        if self.sync.boundary_minutes == 0 || self.sync.boundary_minutes > 60 {
            return Err(Error::ConfigValidation {
                message: format!(
                    "sync.boundary_minutes must be in 1..=60, got {}",
                    self.sync.boundary_minutes
                ),
            });
        }

        for (lab, rooms) in &self.labs.rooms {
            if rooms.is_empty() {
                return Err(Error::ConfigValidation {
                    message: format!("lab {lab} has no rooms"),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the per-request timeout as a Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    /// Get the steady-state refresh interval as a Duration.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.sync.refresh_interval_secs)
    }

    /// Get the current-session lookahead as a chrono Duration.
    #[must_use]
    pub fn lookahead(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.sync.lookahead_minutes))
    }

    /// Get the fetch backdate margin as a chrono Duration.
    #[must_use]
    pub fn fetch_margin(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.sync.fetch_margin_minutes))
    }

    /// Get the rooms for the given lab name (case-insensitive), if known.
    #[must_use]
    pub fn rooms_for(&self, lab_name: &str) -> Option<&[u16]> {
        self.labs
            .rooms
            .get(&lab_name.to_uppercase())
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.backend.request_timeout_secs, 8);
        assert_eq!(config.sync.lookahead_minutes, 30);
        assert_eq!(config.sync.fetch_margin_minutes, 30);
        assert_eq!(config.sync.refresh_interval_secs, 120);
        assert_eq!(config.sync.boundary_minutes, 30);
    }

    #[test]
    fn test_default_roster_known_labs() {
        let config = Config::default();

        assert_eq!(config.rooms_for("SWLAB1"), Some(&[1, 2][..]));
        assert_eq!(config.rooms_for("HWLAB2"), Some(&[1, 2, 3, 4][..]));
        assert_eq!(config.rooms_for("NOSUCHLAB"), None);
    }

    #[test]
    fn test_rooms_for_is_case_insensitive() {
        let config = Config::default();
        assert_eq!(config.rooms_for("swlab1"), Some(&[1, 2][..]));
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.backend.request_timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("request_timeout_secs"));
    }

    #[test]
    fn test_validate_zero_refresh_interval() {
        let mut config = Config::default();
        config.sync.refresh_interval_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("refresh_interval_secs"));
    }

    #[test]
    fn test_validate_bad_boundary() {
        let mut config = Config::default();
        config.sync.boundary_minutes = 0;
        assert!(config.validate().is_err());

        config.sync.boundary_minutes = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_base_url() {
        let mut config = Config::default();
        config.backend.base_url = "   ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_roomless_lab() {
        let mut config = Config::default();
        config.labs.rooms.insert("GHOSTLAB".to_string(), vec![]);

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("GHOSTLAB"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config
            .database_path()
            .to_string_lossy()
            .contains("attendance.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_duration_helpers() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.refresh_interval(), Duration::from_secs(120));
        assert_eq!(config.lookahead(), chrono::Duration::minutes(30));
        assert_eq!(config.fetch_margin(), chrono::Duration::minutes(30));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("labsync"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        // Loading from a nonexistent path should work (uses defaults)
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());

        let config = result.unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_config_serialize() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("request_timeout_secs"));
        assert!(json.contains("lookahead_minutes"));
    }

    #[test]
    fn test_sync_config_deserialize() {
        let json = r#"{"lookahead_minutes": 15, "refresh_interval_secs": 60}"#;
        let sync: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(sync.lookahead_minutes, 15);
        assert_eq!(sync.refresh_interval_secs, 60);
        // Unspecified fields keep their defaults
        assert_eq!(sync.boundary_minutes, 30);
    }
}
