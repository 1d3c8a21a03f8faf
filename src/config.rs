//! Bot configuration loaded from `config.yaml`

use crate::duration::SilencePolicy;
use poise::serenity_prelude::{ChannelId, GuildId, RoleId};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

/// Default configuration file
pub const CONFIG_FILE: &str = "config.yaml";
/// Environment variable overriding [`CONFIG_FILE`]
pub const CONFIG_PATH_VAR: &str = "HUSHBOT_CONFIG";
/// Environment variable holding the bot token
pub const TOKEN_VAR: &str = "DISCORD_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Missing required setting `{0}`")]
    Missing(&'static str),

    #[error("Setting `{0}` must be at least one minute")]
    ZeroMinutes(&'static str),

    #[error("No bot token in config and {TOKEN_VAR} is not set")]
    MissingToken,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot: BotConfig,
    pub guild: GuildConfig,
    pub roles: RolesConfig,
    pub channels: ChannelsConfig,
    pub silence: SilencePolicy,
    pub guard: GuardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub prefix: String,
    /// Left empty to read the token from the environment
    pub token: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildConfig {
    pub id: u64,
    /// Roles allowed to silence for any length, including forever
    pub moderation_roles: Vec<u64>,
    /// Roles allowed to use the silence commands at all
    pub staff_roles: Vec<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    /// Role whose send permission is revoked while a channel is silenced
    pub guests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub mod_log: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub sweep_interval_secs: u64,
    pub max_idle_secs: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
            max_idle_secs: 600,
        }
    }
}

impl GuardConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    #[must_use]
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: crate::logging::LOG_DIR.to_string(),
        }
    }
}

impl Config {
    /// Load the configuration named by `HUSHBOT_CONFIG`, or `config.yaml`
    ///
    /// # Errors
    /// Fails if the file cannot be read or parsed, a required id is missing,
    /// or no token is available.
    pub async fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());
        let config = Self::load(&path).await?;
        config.with_token(std::env::var(TOKEN_VAR).ok())
    }

    /// Read and validate a configuration file
    ///
    /// # Errors
    /// Fails if the file cannot be read, parsed or validated.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
        Self::parse(&content)
    }

    /// Parse and validate YAML content
    ///
    /// # Errors
    /// Fails on malformed YAML, a missing guild or guest role id, or a zero
    /// silence length.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.guild.id == 0 {
            return Err(ConfigError::Missing("guild.id"));
        }
        if self.roles.guests == 0 {
            return Err(ConfigError::Missing("roles.guests"));
        }
        if self.silence.default_minutes == 0 {
            return Err(ConfigError::ZeroMinutes("silence.default_minutes"));
        }
        if self.silence.max_minutes == 0 {
            return Err(ConfigError::ZeroMinutes("silence.max_minutes"));
        }
        Ok(())
    }

    /// Fill in the token from `env_token` when the file leaves it empty
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingToken`] if neither source has one.
    pub fn with_token(mut self, env_token: Option<String>) -> Result<Self, ConfigError> {
        if self.bot.token.trim().is_empty() {
            self.bot.token = env_token
                .filter(|token| !token.trim().is_empty())
                .ok_or(ConfigError::MissingToken)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn guild_id(&self) -> GuildId {
        GuildId::new(self.guild.id)
    }

    #[must_use]
    pub fn guests_role(&self) -> RoleId {
        RoleId::new(self.roles.guests)
    }

    #[must_use]
    pub fn mod_log_channel(&self) -> Option<ChannelId> {
        self.channels
            .mod_log
            .filter(|id| *id != 0)
            .map(ChannelId::new)
    }

    #[must_use]
    pub fn staff_roles(&self) -> Vec<RoleId> {
        to_role_ids(&self.guild.staff_roles)
    }

    #[must_use]
    pub fn moderation_roles(&self) -> Vec<RoleId> {
        to_role_ids(&self.guild.moderation_roles)
    }
}

fn to_role_ids(ids: &[u64]) -> Vec<RoleId> {
    ids.iter()
        .filter(|id| **id != 0)
        .map(|id| RoleId::new(*id))
        .collect()
}
