//! Configuration module for ircline.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocols::ident::IdentConfig;
use crate::protocols::irc::encoding::resolve;
use crate::protocols::irc::ReaderConfig;
use clap::Parser;
use encoding_rs::Encoding;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the client
#[derive(Parser, Debug, Default)]
#[command(name = "ircline")]
#[command(author = "ircline authors")]
#[command(version = "0.1.0")]
#[command(about = "Line-oriented IRC connection core", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server to connect to (e.g., irc.libera.chat:6667)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Default encoding when detection is unsure (e.g., UTF-8, windows-1252)
    #[arg(short, long)]
    pub encoding: Option<String>,

    /// Seconds without input before a keepalive PING is sent (0 disables)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Bytes requested per socket read
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Start the ident responder before connecting
    #[arg(long)]
    pub ident: bool,

    /// Identity reported by the ident responder
    #[arg(short = 'u', long)]
    pub login: Option<String>,

    /// Address for the ident responder (e.g., 0.0.0.0:113)
    #[arg(long)]
    pub ident_listen: Option<String>,

    /// Seconds the ident responder waits for a query
    #[arg(long)]
    pub ident_timeout: Option<u64>,

    /// Raw line to send after connecting (repeatable)
    #[arg(long = "send", value_name = "LINE")]
    pub send: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub ident: IdentSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Server address
    pub server: Option<String>,
    /// Fallback text encoding
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Idle read timeout in seconds, 0 for no keepalive
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Read chunk size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server: None,
            encoding: default_encoding(),
            idle_timeout: default_idle_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Ident responder configuration
#[derive(Debug, Deserialize)]
pub struct IdentSection {
    #[serde(default)]
    pub enabled: bool,
    /// Identity to report
    #[serde(default = "default_login")]
    pub login: String,
    /// Listen address
    #[serde(default = "default_ident_listen")]
    pub listen: String,
    /// Overall wait in seconds
    #[serde(default = "default_ident_timeout")]
    pub timeout: u64,
}

impl Default for IdentSection {
    fn default() -> Self {
        Self {
            enabled: false,
            login: default_login(),
            listen: default_ident_listen(),
            timeout: default_ident_timeout(),
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

fn default_encoding() -> String {
    "UTF-8".to_string()
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_buffer_size() -> usize {
    1024
}

fn default_login() -> String {
    "ircline".to_string()
}

fn default_ident_listen() -> String {
    "0.0.0.0:113".to_string()
}

fn default_ident_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub encoding: &'static Encoding,
    pub idle_timeout: u64,
    pub buffer_size: usize,
    pub ident_enabled: bool,
    pub login: String,
    pub ident_listen: SocketAddr,
    pub ident_timeout: u64,
    pub send: Vec<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            connection,
            ident,
            logging,
        } = toml_config;

        let server = cli
            .server
            .or(connection.server)
            .ok_or(ConfigError::MissingServer)?;

        let label = cli.encoding.unwrap_or(connection.encoding);
        let encoding = resolve(&label).ok_or(ConfigError::UnknownEncoding(label))?;

        let listen = cli.ident_listen.unwrap_or(ident.listen);
        let ident_listen: SocketAddr = listen
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(listen, e))?;

        Ok(Config {
            server,
            encoding,
            idle_timeout: cli.idle_timeout.unwrap_or(connection.idle_timeout),
            buffer_size: cli.buffer_size.unwrap_or(connection.buffer_size),
            ident_enabled: cli.ident || ident.enabled,
            login: cli.login.unwrap_or(ident.login),
            ident_listen,
            ident_timeout: cli.ident_timeout.unwrap_or(ident.timeout),
            send: cli.send,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                logging.level
            },
        })
    }

    /// Settings for the connection reader.
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
            encoding: self.encoding,
            buffer_size: self.buffer_size,
        }
    }

    /// Settings for the ident responder.
    pub fn ident_config(&self) -> IdentConfig {
        IdentConfig {
            listen: self.ident_listen,
            timeout: Duration::from_secs(self.ident_timeout),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingServer,
    UnknownEncoding(String),
    InvalidAddress(String, AddrParseError),
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
            ConfigError::MissingServer => {
                write!(f, "No server given (use --server or [connection] server)")
            }
            ConfigError::UnknownEncoding(label) => write!(f, "Unknown encoding '{label}'"),
            ConfigError::InvalidAddress(addr, e) => {
                write!(f, "Invalid ident listen address '{addr}': {e}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
