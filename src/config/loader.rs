//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::application::OrchestratorSettings;
use crate::domain::{RoomConfig, RoomSession};
use crate::strategy::Strategy;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feeds: Vec<FeedSection>,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    pub rooms: Vec<RoomSection>,
}

/// One outcome feed to poll
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    /// Identifier rooms reference in their `feed` field
    pub id: String,
    pub api_url: String,
    #[serde(default = "defaults::feed_timeout_secs")]
    pub timeout_secs: u64,
}

/// Outgoing message pacing and queueing
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    /// Messages a bot token may burst before pacing applies
    #[serde(default = "defaults::burst")]
    pub burst: u32,
    /// Sustained messages per second per bot token
    #[serde(default = "defaults::per_second")]
    pub per_second: f64,
    #[serde(default = "defaults::queue_size")]
    pub queue_size: usize,
    #[serde(default = "defaults::send_timeout_secs")]
    pub send_timeout_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            burst: defaults::burst(),
            per_second: defaults::per_second(),
            queue_size: defaults::queue_size(),
            send_timeout_secs: defaults::send_timeout_secs(),
        }
    }
}

/// Polling and lifecycle timing
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "defaults::shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Hour (UTC) at which daily quotas reset
    #[serde(default)]
    pub daily_reset_hour_utc: u32,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: defaults::poll_interval_secs(),
            shutdown_grace_secs: defaults::shutdown_grace_secs(),
            daily_reset_hour_utc: 0,
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Default log filter when RUST_LOG and the CLI flags are absent:
    /// "trace", "debug", "info", "warn", "error"
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

/// One Telegram room and its strategy set
#[derive(Debug, Clone, Deserialize)]
pub struct RoomSection {
    pub id: String,
    /// Bot token; may be left empty to use the per-room environment
    /// variable instead (never commit real tokens)
    #[serde(default)]
    pub bot_token: String,
    pub channel_id: String,
    /// Which `[[feeds]]` entry this room follows
    pub feed: String,
    #[serde(default = "defaults::max_gales")]
    pub max_gales: u8,
    #[serde(default = "defaults::protection")]
    pub protection: bool,
    #[serde(default = "defaults::confidence_threshold")]
    pub confidence_threshold: u8,
    #[serde(default = "defaults::max_concurrent_signals")]
    pub max_concurrent_signals: usize,
    #[serde(default)]
    pub win_sticker: Option<String>,
    #[serde(default)]
    pub loss_sticker: Option<String>,
    #[serde(default)]
    pub strategies: Vec<StrategySection>,
}

/// One pattern strategy inside a room
#[derive(Debug, Clone, Deserialize)]
pub struct StrategySection {
    pub id: u32,
    pub name: String,
    /// Ordered tokens, oldest first: "X", "R", "B", "W" or "0".."14"
    pub pattern: Vec<String>,
    /// Color to bet when the pattern completes
    pub bet: String,
    #[serde(default = "defaults::min_confidence")]
    pub min_confidence: u8,
    #[serde(default = "defaults::max_daily_signals")]
    pub max_daily_signals: u32,
    #[serde(default = "defaults::priority")]
    pub priority: u32,
    #[serde(default = "defaults::active")]
    pub active: bool,
}

mod defaults {
    pub fn feed_timeout_secs() -> u64 {
        10
    }
    pub fn burst() -> u32 {
        5
    }
    pub fn per_second() -> f64 {
        1.0
    }
    pub fn queue_size() -> usize {
        256
    }
    pub fn send_timeout_secs() -> u64 {
        10
    }
    pub fn poll_interval_secs() -> u64 {
        3
    }
    pub fn shutdown_grace_secs() -> u64 {
        5
    }
    pub fn log_level() -> String {
        "info".to_string()
    }
    pub fn max_gales() -> u8 {
        2
    }
    pub fn protection() -> bool {
        true
    }
    pub fn confidence_threshold() -> u8 {
        60
    }
    pub fn max_concurrent_signals() -> usize {
        1
    }
    pub fn min_confidence() -> u8 {
        50
    }
    pub fn max_daily_signals() -> u32 {
        10
    }
    pub fn priority() -> u32 {
        100
    }
    pub fn active() -> bool {
        true
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("No bot token for room '{0}': set bot_token or {1}")]
    MissingToken(String, String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[feeds]] entry is required".to_string(),
            ));
        }
        for (i, feed) in self.feeds.iter().enumerate() {
            if feed.id.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "feeds[{}].id cannot be empty",
                    i
                )));
            }
            if feed.api_url.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "feed '{}' api_url cannot be empty",
                    feed.id
                )));
            }
            if self.feeds.iter().filter(|f| f.id == feed.id).count() > 1 {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate feed id '{}'",
                    feed.id
                )));
            }
        }

        if self.dispatch.per_second <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "dispatch.per_second must be > 0, got {}",
                self.dispatch.per_second
            )));
        }
        if self.dispatch.burst == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.burst must be > 0".to_string(),
            ));
        }

        if self.runtime.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.runtime.daily_reset_hour_utc > 23 {
            return Err(ConfigError::ValidationError(format!(
                "runtime.daily_reset_hour_utc must be 0-23, got {}",
                self.runtime.daily_reset_hour_utc
            )));
        }

        if self.rooms.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[rooms]] entry is required".to_string(),
            ));
        }
        for room in &self.rooms {
            if room.id.is_empty() {
                return Err(ConfigError::ValidationError(
                    "room id cannot be empty".to_string(),
                ));
            }
            if self.rooms.iter().filter(|r| r.id == room.id).count() > 1 {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate room id '{}'",
                    room.id
                )));
            }
            if room.channel_id.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "room '{}' channel_id cannot be empty",
                    room.id
                )));
            }
            if !self.feeds.iter().any(|f| f.id == room.feed) {
                return Err(ConfigError::ValidationError(format!(
                    "room '{}' references unknown feed '{}'",
                    room.id, room.feed
                )));
            }
            if room.confidence_threshold > 100 {
                return Err(ConfigError::ValidationError(format!(
                    "room '{}' confidence_threshold must be 0-100, got {}",
                    room.id, room.confidence_threshold
                )));
            }
            if room.max_concurrent_signals == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "room '{}' max_concurrent_signals must be >= 1",
                    room.id
                )));
            }
        }

        Ok(())
    }
}

impl RoomSection {
    /// Environment variable consulted when `bot_token` is empty, derived
    /// from the room id: `vip-room` becomes DOUBLE_SIGNALS_BOT_TOKEN_VIP_ROOM.
    pub fn token_env_var(&self) -> String {
        let suffix: String = self
            .id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("DOUBLE_SIGNALS_BOT_TOKEN_{}", suffix)
    }

    /// Resolve the bot token, falling back to the environment
    pub fn resolve_bot_token(&self) -> Result<String, ConfigError> {
        if !self.bot_token.is_empty() {
            return Ok(self.bot_token.clone());
        }
        let var = self.token_env_var();
        std::env::var(&var)
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingToken(self.id.clone(), var))
    }

    /// Build the runtime session. Strategies that fail to parse are
    /// skipped with a warning so one typo does not take the room down.
    pub fn build_session(&self) -> Result<RoomSession, ConfigError> {
        let credential = self.resolve_bot_token()?;
        Ok(self.build_session_with(credential))
    }

    /// Build the session with an explicit credential, used by dry runs
    /// where no real token exists.
    pub fn build_session_with(&self, credential: String) -> RoomSession {
        let mut strategies = Vec::with_capacity(self.strategies.len());
        for section in &self.strategies {
            match Strategy::from_parts(
                section.id,
                &section.name,
                &section.pattern,
                &section.bet,
                section.min_confidence,
                section.max_daily_signals,
                section.priority,
                section.active,
            ) {
                Ok(strategy) => strategies.push(strategy),
                Err(e) => tracing::warn!(
                    "room '{}': skipping strategy '{}': {}",
                    self.id,
                    section.name,
                    e
                ),
            }
        }
        if strategies.is_empty() {
            tracing::warn!("room '{}' has no usable strategies", self.id);
        }

        RoomSession::new(
            RoomConfig {
                room_id: self.id.clone(),
                credential,
                channel_id: self.channel_id.clone(),
                feed_id: self.feed.clone(),
                max_gales: self.max_gales,
                protection: self.protection,
                confidence_threshold: self.confidence_threshold,
                max_concurrent_signals: self.max_concurrent_signals,
                win_sticker: self.win_sticker.clone(),
                loss_sticker: self.loss_sticker.clone(),
            },
            strategies,
        )
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        use std::time::Duration;

        OrchestratorSettings {
            poll_interval: Duration::from_secs(config.runtime.poll_interval_secs),
            dispatch_queue_size: config.dispatch.queue_size,
            send_timeout: Duration::from_secs(config.dispatch.send_timeout_secs),
            shutdown_grace: Duration::from_secs(config.runtime.shutdown_grace_secs),
            dispatch_burst: config.dispatch.burst,
            dispatch_per_second: config.dispatch.per_second,
            daily_reset_hour_utc: config.runtime.daily_reset_hour_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[[feeds]]
id = "blaze-double"
api_url = "https://blaze.com/api/roulette_games/recent"

[dispatch]
burst = 3
per_second = 0.5

[runtime]
poll_interval_secs = 2
daily_reset_hour_utc = 3

[logging]
level = "debug"

[[rooms]]
id = "vip"
bot_token = "123:abc"
channel_id = "-1001"
feed = "blaze-double"
max_gales = 2
confidence_threshold = 70

[[rooms.strategies]]
id = 1
name = "Double Red"
pattern = ["R", "R"]
bet = "B"
min_confidence = 70

[[rooms.strategies]]
id = 2
name = "After White"
pattern = ["W"]
bet = "R"
priority = 2
"#
        .to_string()
    }

    fn load(content: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load_config(file.path())
    }

    #[test]
    fn test_load_valid_config() {
        let config = load(&create_valid_config()).unwrap();

        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].id, "blaze-double");
        assert_eq!(config.dispatch.burst, 3);
        assert_eq!(config.runtime.daily_reset_hour_utc, 3);
        assert_eq!(config.rooms.len(), 1);
        assert_eq!(config.rooms[0].strategies.len(), 2);
        // Unset fields take their defaults.
        assert_eq!(config.rooms[0].max_concurrent_signals, 1);
        assert!(config.rooms[0].protection);
        assert_eq!(config.rooms[0].strategies[1].max_daily_signals, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_room_with_unknown_feed_rejected() {
        let content = create_valid_config().replace("feed = \"blaze-double\"", "feed = \"other\"");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_invalid_dispatch_rate_rejected() {
        let content = create_valid_config().replace("per_second = 0.5", "per_second = 0.0");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_invalid_reset_hour_rejected() {
        let content =
            create_valid_config().replace("daily_reset_hour_utc = 3", "daily_reset_hour_utc = 24");
        assert!(matches!(
            load(&content).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_build_session_skips_invalid_strategy() {
        let mut content = create_valid_config();
        content.push_str(
            r#"
[[rooms.strategies]]
id = 3
name = "Broken"
pattern = ["Q"]
bet = "B"
"#,
        );
        let config = load(&content).unwrap();
        let session = config.rooms[0].build_session().unwrap();
        // The broken strategy is dropped, the two valid ones survive.
        assert!(session.has_strategies());
    }

    #[test]
    fn test_token_env_var_shape() {
        let config = load(&create_valid_config()).unwrap();
        let mut room = config.rooms[0].clone();
        room.id = "vip-room 1".to_string();
        assert_eq!(room.token_env_var(), "DOUBLE_SIGNALS_BOT_TOKEN_VIP_ROOM_1");
    }

    #[test]
    fn test_missing_token_is_reported() {
        let content = create_valid_config().replace("bot_token = \"123:abc\"", "");
        let config = load(&content).unwrap();
        std::env::remove_var("DOUBLE_SIGNALS_BOT_TOKEN_VIP");
        assert!(matches!(
            config.rooms[0].build_session().unwrap_err(),
            ConfigError::MissingToken(_, _)
        ));
    }

    #[test]
    fn test_token_from_environment() {
        let content = create_valid_config()
            .replace("id = \"vip\"", "id = \"envroom\"")
            .replace("bot_token = \"123:abc\"", "");
        let config = load(&content).unwrap();
        std::env::set_var("DOUBLE_SIGNALS_BOT_TOKEN_ENVROOM", "456:def");
        assert_eq!(config.rooms[0].resolve_bot_token().unwrap(), "456:def");
        std::env::remove_var("DOUBLE_SIGNALS_BOT_TOKEN_ENVROOM");
    }

    #[test]
    fn test_settings_conversion() {
        let config = load(&create_valid_config()).unwrap();
        let settings = OrchestratorSettings::from(&config);
        assert_eq!(settings.poll_interval.as_secs(), 2);
        assert_eq!(settings.dispatch_burst, 3);
        assert_eq!(settings.daily_reset_hour_utc, 3);
    }
}
