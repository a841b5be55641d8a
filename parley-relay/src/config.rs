//! Relay settings.
//!
//! Each setting is taken from the first place that has it: a command-line
//! flag (or its `PARLEY_*` environment variable), the `[server]` table of
//! the config file, then the built-in default. The file defaults to
//! `~/.config/parley-relay/config.toml` and may be absent.

use std::path::{Path, PathBuf};

use crate::relay::DEFAULT_MAX_FRAME_SIZE;
use crate::store::DEFAULT_CHANNEL_CAPACITY;

/// Address the relay listens on when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Why the relay settings could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists (or was named explicitly) but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the `[server]` table.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A numeric limit was set to zero.
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}

/// Shape of the config file. Every key is optional.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerTable,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerTable {
    bind_addr: Option<String>,
    channel_capacity: Option<usize>,
    max_frame_size: Option<usize>,
}

/// Command line of `parley-relay`.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Parley relay server")]
pub struct RelayCliArgs {
    /// Address to listen on (default `0.0.0.0:8080`).
    #[arg(short, long, env = "PARLEY_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of `~/.config/parley-relay/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Live messages a connected user may have pending before senders wait.
    #[arg(long)]
    pub channel_capacity: Option<usize>,

    /// Largest inbound WebSocket message, in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log filter, e.g. `info` or `parley_relay=debug`.
    #[arg(long, default_value = "info", env = "PARLEY_LOG")]
    pub log_level: String,
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// `host:port` to listen on.
    pub bind_addr: String,
    /// Capacity of each session's live delivery channel.
    pub channel_capacity: usize,
    /// Largest inbound WebSocket message, in bytes.
    pub max_frame_size: usize,
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads the config file and merges it under the command line.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a file named with `--config` is missing,
    /// if any config file is unreadable or malformed, or if a limit is zero.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => read_config_file(path)?,
            None => read_default_config_file()?,
        };
        Self::merge(cli, file.server).validated()
    }

    fn merge(cli: &RelayCliArgs, server: ServerTable) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            channel_capacity: cli
                .channel_capacity
                .or(server.channel_capacity)
                .unwrap_or(defaults.channel_capacity),
            max_frame_size: cli
                .max_frame_size
                .or(server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            log_level: cli.log_level.clone(),
        }
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Zero("max_frame_size"));
        }
        Ok(self)
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

/// Like [`read_config_file`], but a missing file (or config dir) means
/// "no overrides".
fn read_default_config_file() -> Result<RelayConfigFile, ConfigError> {
    let Some(path) = dirs::config_dir().map(|d| d.join("parley-relay").join("config.toml"))
    else {
        return Ok(RelayConfigFile::default());
    };
    match read_config_file(&path) {
        Err(ConfigError::ReadFile { source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            Ok(RelayConfigFile::default())
        }
        other => other,
    }
}
