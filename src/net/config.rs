#![cfg(feature = "net")]

//! Server configuration.

use crate::behaviour::Behaviour;
use crate::decoder::{POLY_DEGREE, SERVER_COUNT};
use crate::field::{Field, FieldError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use std::{env, fs};
use thiserror::Error;

/// Default prime used by the CLI.
pub const DEFAULT_PRIME: u64 = 1997;
/// Default voting window.
pub const DEFAULT_WINDOW_SECS: u64 = 15;
const DEFAULT_IO_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ROUND_TIMEOUT_MS: u64 = 60_000;

/// Address of one partner server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Partner index, `1..=n`.
    pub index: u64,
    /// Partner listen address.
    pub addr: SocketAddr,
}

/// Configuration of one tally server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Human-readable identity used in logs and handshakes.
    pub identity: String,
    /// This server's index, `1..=n`.
    pub index: u64,
    /// Address accepting both voter and peer connections.
    pub listen: SocketAddr,
    /// The other `n - 1` servers.
    pub peers: Vec<PeerAddr>,
    /// Field modulus.
    #[serde(default = "default_prime")]
    pub prime: u64,
    /// Sharing polynomial degree.
    #[serde(default = "default_degree")]
    pub degree: usize,
    /// Length of the voting window in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    /// The main server starts the voting window.
    #[serde(default)]
    pub main: bool,
    /// Connected peers required before the main server opens the window.
    #[serde(default = "default_peer_threshold")]
    pub peer_threshold: usize,
    /// Deadline for dials and handshakes, in milliseconds.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Deadline from window close to tally, in milliseconds.
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    /// Honest or simulated-adversary behaviour.
    #[serde(default)]
    pub behaviour: Behaviour,
    /// Optional seed for the behaviour RNG.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_prime() -> u64 {
    DEFAULT_PRIME
}

fn default_degree() -> usize {
    POLY_DEGREE
}

fn default_window_ms() -> u64 {
    DEFAULT_WINDOW_SECS * 1000
}

fn default_peer_threshold() -> usize {
    SERVER_COUNT - 1
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

fn default_round_timeout_ms() -> u64 {
    DEFAULT_ROUND_TIMEOUT_MS
}

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The modulus is unusable.
    #[error(transparent)]
    Field(#[from] FieldError),
    /// Only the four-server, degree-1 deployment is supported.
    #[error("unsupported parameters: {0}")]
    Unsupported(String),
    /// Server or peer indices are inconsistent.
    #[error("invalid server index: {0}")]
    Index(String),
}

impl NodeConfig {
    /// Builds a configuration with defaults for everything but the topology.
    pub fn new(
        identity: impl Into<String>,
        index: u64,
        listen: SocketAddr,
        peers: Vec<PeerAddr>,
    ) -> Self {
        Self {
            identity: identity.into(),
            index,
            listen,
            peers,
            prime: DEFAULT_PRIME,
            degree: POLY_DEGREE,
            window_ms: default_window_ms(),
            main: false,
            peer_threshold: default_peer_threshold(),
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
            round_timeout_ms: DEFAULT_ROUND_TIMEOUT_MS,
            behaviour: Behaviour::Honest,
            seed: None,
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        serde_json::from_str(&contents).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies `TALLY_IO_TIMEOUT_MS` and `TALLY_ROUND_TIMEOUT_MS`.
    pub fn apply_env(mut self) -> Self {
        if let Some(ms) = env_ms("TALLY_IO_TIMEOUT_MS") {
            self.io_timeout_ms = ms;
        }
        if let Some(ms) = env_ms("TALLY_ROUND_TIMEOUT_MS") {
            self.round_timeout_ms = ms;
        }
        self
    }

    /// Checks every startup invariant and returns the field.
    ///
    /// Failures here are fatal and happen before any socket is opened.
    pub fn validate(&self) -> Result<Field, ConfigError> {
        let field = Field::new(self.prime)?;
        if self.degree != POLY_DEGREE {
            return Err(ConfigError::Unsupported(format!(
                "polynomial degree {} (only {POLY_DEGREE} is supported)",
                self.degree
            )));
        }
        let n = SERVER_COUNT as u64;
        if !(1..=n).contains(&self.index) {
            return Err(ConfigError::Index(format!(
                "own index {} outside 1..={n}",
                self.index
            )));
        }
        if self.peers.len() != SERVER_COUNT - 1 {
            return Err(ConfigError::Unsupported(format!(
                "{} peers configured, expected {}",
                self.peers.len(),
                SERVER_COUNT - 1
            )));
        }
        let mut seen = HashSet::from([self.index]);
        for peer in &self.peers {
            if !(1..=n).contains(&peer.index) || !seen.insert(peer.index) {
                return Err(ConfigError::Index(format!(
                    "peer index {} is repeated or outside 1..={n}",
                    peer.index
                )));
            }
        }
        if self.peer_threshold == 0 || self.peer_threshold > SERVER_COUNT - 1 {
            return Err(ConfigError::Unsupported(format!(
                "peer threshold {}",
                self.peer_threshold
            )));
        }
        Ok(field)
    }

    /// Voting window.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Per-I/O deadline.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Deadline for a round once the window has closed.
    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }
}

fn env_ms(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}
