//! Networked tally servers and voter clients.
//!
//! These modules are gated behind the `net` Cargo feature and provide the
//! runtime driven by the `tally` CLI: the JSON wire schema, server
//! configuration, the server coordinator and the voter client.

#![cfg(feature = "net")]

/// Server configuration and validation.
pub mod config;
/// Server runtime and round coordinator.
pub mod node;
/// Newline-delimited JSON wire messages.
pub mod schema;
/// Voter client.
pub mod voter;

pub use config::{ConfigError, NodeConfig, PeerAddr, DEFAULT_PRIME, DEFAULT_WINDOW_SECS};
pub use node::{CollectError, NetworkError, NodeHandle, Phase, PointCollector, ServerNode};
pub use schema::{read_message, write_message, Message, MAX_MESSAGE_BYTES};
pub use voter::{vote, VoterClient};
