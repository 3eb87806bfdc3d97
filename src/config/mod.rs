//! Configuration management

use crate::game::SessionRules;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub game: GameConfig,
    pub maze: MazeConfig,
    pub storage: StorageConfig,
}

/// Network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the game server listens on
    pub bind: String,

    /// Largest accepted frame payload in bytes
    pub max_message_size: u32,

    /// Outbound messages buffered per connection. A client that lets its
    /// queue fill up with unread broadcasts is disconnected.
    pub client_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7420".to_string(),
            max_message_size: 1024 * 1024,
            client_queue: 256,
        }
    }
}

/// Match rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Maze width in cells
    pub width: usize,

    /// Maze height in cells
    pub height: usize,

    /// Seats per session, bots included
    pub max_players: usize,

    /// Seated users required to start
    pub min_players: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            max_players: crate::game::MAX_PLAYERS,
            min_players: crate::game::MIN_PLAYERS,
        }
    }
}

impl GameConfig {
    pub fn rules(&self) -> SessionRules {
        SessionRules {
            max_players: self.max_players,
            min_players: self.min_players,
        }
    }
}

/// Maze generation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MazeConfig {
    pub remote: RemoteMazeConfig,
}

/// Remote (LLM-backed) maze generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteMazeConfig {
    /// Use the remote service before falling back to local generation
    pub enabled: bool,

    /// Responses API endpoint
    pub endpoint: String,

    /// Model identifier sent with each request
    pub model: String,

    /// API key; read from `api_key_env` when unset
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    pub organization: Option<String>,

    pub project: Option<String>,

    /// Seconds to wait before falling back to local generation
    pub timeout_secs: u64,
}

impl Default for RemoteMazeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://api.openai.com/v1/responses".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            organization: None,
            project: None,
            timeout_secs: 30,
        }
    }
}

/// Where session records are kept
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Directory for the file backend
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load and validate config from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gridrunners")
            .join("config.toml")
    }

    /// Directory used by the file storage backend
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(dirs::data_dir)
            .unwrap_or_else(std::env::temp_dir)
            .join("gridrunners")
            .join("sessions")
    }

    /// Reject settings the game cannot run with
    pub fn validate(&self) -> Result<()> {
        let game = &self.game;
        if game.width < 7 || game.height < 7 {
            bail!(
                "Maze must be at least 7x7, got {}x{}",
                game.width,
                game.height
            );
        }
        if game.max_players == 0 || game.max_players > crate::game::PlayerColor::PALETTE.len() {
            bail!(
                "max_players must be between 1 and {}, got {}",
                crate::game::PlayerColor::PALETTE.len(),
                game.max_players
            );
        }
        if game.min_players == 0 || game.min_players > game.max_players {
            bail!(
                "min_players must be between 1 and max_players, got {}",
                game.min_players
            );
        }
        if self.server.max_message_size == 0 {
            bail!("max_message_size must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.game.width, 20);
        assert_eq!(config.game.max_players, 4);
        assert!(!config.maze.remote.enabled);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [game]
            width = 31

            [storage]
            backend = "file"
            "#,
        )
        .unwrap();
        assert_eq!(config.game.width, 31);
        assert_eq!(config.game.height, 20);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert_eq!(config.server.bind, "127.0.0.1:7420");
    }

    #[test]
    fn test_validate_rejects_tiny_maze() {
        let mut config = Config::default();
        config.game.width = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_more_seats_than_colors() {
        let mut config = Config::default();
        config.game.max_players = 5;
        assert!(config.validate().is_err());
    }
}
