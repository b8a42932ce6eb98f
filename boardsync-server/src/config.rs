//! Configuration for the board server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/boardsync-server/config.toml`)
//! 4. Compiled defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::presence::PresenceSettings;

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A value parsed but makes no sense.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Offending setting.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerSection,
    presence: PresenceSection,
    directory: DirectorySection,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

/// `[presence]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceSection {
    inactivity_threshold_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    warning_lead_secs: Option<u64>,
}

/// `[directory]` section: users known to the in-memory store, and optionally
/// the only projects it accepts.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DirectorySection {
    users: BTreeMap<String, String>,
    projects: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the board server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "BoardSync real-time board server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "BOARDSYNC_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/boardsync-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Idle seconds after which a user is reported inactive.
    #[arg(long)]
    pub inactivity_threshold_secs: Option<u64>,

    /// Seconds between inactivity sweeps.
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Seconds before the threshold at which idle users are warned.
    #[arg(long)]
    pub warning_lead_secs: Option<u64>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "BOARDSYNC_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9100`).
    pub bind_addr: String,
    /// Maximum inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Idle seconds after which a user is reported inactive.
    pub inactivity_threshold_secs: u64,
    /// Seconds between inactivity sweeps.
    pub sweep_interval_secs: u64,
    /// Seconds before the threshold at which idle users are warned.
    pub warning_lead_secs: u64,
    /// Log level filter string.
    pub log_level: String,
    /// User id -> display name, seeded into the store.
    pub users: BTreeMap<String, String>,
    /// If set, the only projects the store accepts.
    pub projects: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9100".to_string(),
            max_frame_size: 64 * 1024,
            inactivity_threshold_secs: 300,
            sweep_interval_secs: 60,
            warning_lead_secs: 60,
            log_level: "info".to_string(),
            users: BTreeMap::new(),
            projects: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if the timing settings are inconsistent.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, file);
        config.validate()?;
        Ok(config)
    }

    /// Priority: CLI > file > default. The warning lead defaults to the
    /// sweep interval in effect.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Self {
        let defaults = Self::default();
        let sweep_interval_secs = cli
            .sweep_interval_secs
            .or(file.presence.sweep_interval_secs)
            .unwrap_or(defaults.sweep_interval_secs);

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            inactivity_threshold_secs: cli
                .inactivity_threshold_secs
                .or(file.presence.inactivity_threshold_secs)
                .unwrap_or(defaults.inactivity_threshold_secs),
            sweep_interval_secs,
            warning_lead_secs: cli
                .warning_lead_secs
                .or(file.presence.warning_lead_secs)
                .unwrap_or(sweep_interval_secs),
            log_level: cli.log_level.clone(),
            users: file.directory.users,
            projects: file.directory.projects,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "sweep_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.inactivity_threshold_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "inactivity_threshold_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid {
                key: "max_frame_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Presence timing in milliseconds.
    #[must_use]
    pub const fn presence_settings(&self) -> PresenceSettings {
        PresenceSettings {
            threshold_ms: self.inactivity_threshold_secs.saturating_mul(1000),
            warning_lead_ms: self.warning_lead_secs.saturating_mul(1000),
        }
    }

    /// Period of the inactivity sweeper.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("boardsync-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
