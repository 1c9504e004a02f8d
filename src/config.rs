//! Configuration module for the fanout-echo server and client.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Command-line arguments for the broadcast server
#[derive(Parser, Debug)]
#[command(name = "fanout-echo")]
#[command(author = "fanout-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo server that broadcasts to every connected client", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (defaults to every interface)
    #[arg(short = 'H', long)]
    pub host: Option<IpAddr>,

    /// Capacity of the receive buffer in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of pending connection requests
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Number of readiness events handled per wake-up
    #[arg(long)]
    pub events: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Command-line arguments for the console client
#[derive(Parser, Debug)]
#[command(name = "fanout-echo-client")]
#[command(version = "0.1.0")]
#[command(about = "Console client for the fanout-echo server", long_about = None)]
pub struct ClientArgs {
    /// Server hostname or address
    pub host: String,

    /// Server port
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
        }
    }
}

/// Event loop configuration
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Receive buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Readiness events handled per wake-up
    #[serde(default = "default_events")]
    pub events: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            events: default_events(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_backlog() -> i32 {
    10
}

fn default_buffer_size() -> usize {
    1024
}

fn default_events() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub backlog: i32,
    pub buffer_size: usize,
    pub events: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::from_parts(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn from_parts(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            buffer_size: cli
                .buffer_size
                .unwrap_or(toml_config.runtime.buffer_size),
            events: cli.events.unwrap_or(toml_config.runtime.events),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than zero"));
        }
        if self.events == 0 {
            return Err(ConfigError::Invalid("events must be greater than zero"));
        }
        if self.backlog <= 0 {
            return Err(ConfigError::Invalid("backlog must be greater than zero"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
