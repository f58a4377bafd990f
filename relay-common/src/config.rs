//! Bootstrap configuration loading
//!
//! Config file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `RELAY_CONFIG` environment variable
//! 3. Platform config file (`~/.config/relay/config.toml`, then `/etc/relay/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing config file never prevents startup; a malformed one does.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "RELAY_CONFIG";

/// Bitrate used whenever probing a song fails (bits per second)
pub const DEFAULT_FALLBACK_BIT_RATE: &str = "128000";

/// Bits per byte; converts a bitrate into the throttle's byte rate
pub const DEFAULT_BIT_RATE_DIVISOR: u64 = 8;

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding the web pages and other static assets
    #[serde(default = "default_public_directory")]
    pub public_directory: PathBuf,

    /// Directory holding the songs
    #[serde(default = "default_audio_directory")]
    pub audio_directory: PathBuf,

    /// File name (relative to `audio_directory`) of the song being relayed
    #[serde(default = "default_current_song")]
    pub current_song: String,

    /// Listener page, relative to `public_directory`
    #[serde(default = "default_home_page")]
    pub home_page: String,

    /// Controller page, relative to `public_directory`
    #[serde(default = "default_controller_page")]
    pub controller_page: String,

    #[serde(default)]
    pub streaming: StreamingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streaming constants
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StreamingConfig {
    /// Decimal bits/second used when the bitrate probe fails
    #[serde(default = "default_fallback_bit_rate")]
    pub fallback_bit_rate: String,

    /// Divides the bitrate to obtain bytes/second (conventionally 8)
    #[serde(default = "default_bit_rate_divisor")]
    pub bit_rate_divisor: u64,

    /// Chunks buffered per listener before it is considered too slow and dropped
    #[serde(default = "default_client_buffer_chunks")]
    pub client_buffer_chunks: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    3000
}

fn default_public_directory() -> PathBuf {
    PathBuf::from("public")
}

fn default_audio_directory() -> PathBuf {
    PathBuf::from("audio/songs")
}

fn default_current_song() -> String {
    "conversation.mp3".to_string()
}

fn default_home_page() -> String {
    "home/index.html".to_string()
}

fn default_controller_page() -> String {
    "controller/index.html".to_string()
}

fn default_fallback_bit_rate() -> String {
    DEFAULT_FALLBACK_BIT_RATE.to_string()
}

fn default_bit_rate_divisor() -> u64 {
    DEFAULT_BIT_RATE_DIVISOR
}

fn default_client_buffer_chunks() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            public_directory: default_public_directory(),
            audio_directory: default_audio_directory(),
            current_song: default_current_song(),
            home_page: default_home_page(),
            controller_page: default_controller_page(),
            streaming: StreamingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            fallback_bit_rate: default_fallback_bit_rate(),
            bit_rate_divisor: default_bit_rate_divisor(),
            client_buffer_chunks: default_client_buffer_chunks(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.streaming.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Full path of the song being relayed
    pub fn song_path(&self) -> PathBuf {
        self.audio_directory.join(&self.current_song)
    }
}

impl StreamingConfig {
    /// Fallback bitrate as bits/second
    pub fn fallback_bit_rate_bps(&self) -> Result<u64> {
        match self.fallback_bit_rate.trim().parse::<u64>() {
            Ok(bps) if bps > 0 => Ok(bps),
            _ => Err(Error::Config(format!(
                "fallback_bit_rate must be a positive integer, got '{}'",
                self.fallback_bit_rate
            ))),
        }
    }

    /// Reject values the streaming core cannot work with
    pub fn validate(&self) -> Result<()> {
        self.fallback_bit_rate_bps()?;
        if self.bit_rate_divisor == 0 {
            return Err(Error::Config("bit_rate_divisor must not be zero".to_string()));
        }
        if self.client_buffer_chunks == 0 {
            return Err(Error::Config(
                "client_buffer_chunks must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locates and loads the bootstrap configuration
pub struct ConfigResolver {
    cli_path: Option<PathBuf>,
    env_var_name: String,
}

impl ConfigResolver {
    /// Create a resolver honoring an optional `--config` argument
    pub fn new(cli_path: Option<PathBuf>) -> Self {
        Self {
            cli_path,
            env_var_name: CONFIG_ENV_VAR.to_string(),
        }
    }

    /// Use a different environment variable (tests)
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var_name = name.into();
        self
    }

    /// Explicitly requested config file, if any (CLI, then environment)
    fn explicit_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }
        std::env::var(&self.env_var_name).ok().map(PathBuf::from)
    }

    /// Load the configuration
    ///
    /// An explicitly requested file must exist. Without one, the first platform
    /// config file found is used, otherwise compiled defaults.
    pub fn load(&self) -> Result<TomlConfig> {
        if let Some(path) = self.explicit_path() {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!("Loading config from {}", path.display());
            return TomlConfig::from_file(&path);
        }

        match default_config_candidates().into_iter().find(|p| p.exists()) {
            Some(path) => {
                info!("Loading config from {}", path.display());
                TomlConfig::from_file(&path)
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok(TomlConfig::default())
            }
        }
    }
}

/// Platform config file locations, most specific first
fn default_config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("relay").join("config.toml"));
    }
    if cfg!(unix) {
        candidates.push(PathBuf::from("/etc/relay/config.toml"));
    }
    candidates
}
