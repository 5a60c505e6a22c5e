//! Server configuration.

use anyhow::ensure;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if it is missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            default_config
        };
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let board = &self.board;
        ensure!(board.cols > 0 && board.rows > 0, "board must have at least one cell");
        ensure!(board.max_players > 0, "board.max_players must be positive");
        // Every player needs a starting cell and one cell is reserved for the dot.
        ensure!(
            (board.cols as usize) * (board.rows as usize) > board.max_players,
            "a {}x{} board cannot seat {} players",
            board.cols,
            board.rows,
            board.max_players
        );
        ensure!(self.session.mailbox_capacity > 0, "session.mailbox_capacity must be positive");
        ensure!(self.session.broadcast_capacity > 0, "session.broadcast_capacity must be positive");
        ensure!(self.server.outbound_capacity > 0, "server.outbound_capacity must be positive");
        Ok(())
    }
}

/// Server networking settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Connections per IP limit.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Frames queued per connection before board updates start being dropped.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

fn default_port() -> u16 {
    4000
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    500
}
fn default_ip_limit() -> usize {
    50
}
fn default_outbound_capacity() -> usize {
    64
}

/// Board geometry applied to every new session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoardConfig {
    #[serde(default = "default_board_cols")]
    pub cols: u32,
    #[serde(default = "default_board_rows")]
    pub rows: u32,
    /// Joins beyond this are refused with `board full`.
    #[serde(default = "default_max_players")]
    pub max_players: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            cols: default_board_cols(),
            rows: default_board_rows(),
            max_players: default_max_players(),
        }
    }
}

fn default_board_cols() -> u32 {
    20
}
fn default_board_rows() -> u32 {
    20
}
fn default_max_players() -> usize {
    8
}

/// Session actor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Sessions with no client activity for this long are torn down.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Commands buffered per session mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
    /// Events retained per board topic for slow subscribers.
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Fixed RNG seed for dot and spawn placement (random when unset).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            idle_timeout_secs: default_idle_timeout(),
            mailbox_capacity: default_mailbox_capacity(),
            broadcast_capacity: default_broadcast_capacity(),
            seed: None,
        }
    }
}

fn default_tick_interval() -> u64 {
    150
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_mailbox_capacity() -> usize {
    256
}
fn default_broadcast_capacity() -> usize {
    16
}
