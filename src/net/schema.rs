#![cfg(feature = "net")]

//! Wire messages exchanged between voters and tally servers.
//!
//! Every frame is one JSON object on its own line, tagged by `"type"`.

use crate::tally::Results;
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one encoded frame, newline included.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// Messages of the tally protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Voter registers with a server.
    ClientJoin {
        /// Voter identity.
        identity: String,
    },
    /// Server acknowledges a voter and tells it which index it holds.
    JoinAccepted {
        /// Numeric index of the server, `1..=n`.
        index: u64,
    },
    /// A voter's share, or a server's partial sum.
    RNumber {
        /// Field-valued payload (signed so that bad reports survive decoding).
        value: i64,
    },
    /// Peer bootstrap handshake.
    ServerJoin {
        /// Sender identity.
        identity: String,
        /// Sender index.
        index: u64,
    },
    /// Reply to [`Message::ServerJoin`].
    ServerResponse {
        /// Responder identity.
        identity: String,
        /// Responder index.
        index: u64,
    },
    /// Roster exchanged when the voting window closes.
    ClientList {
        /// Voter identities seen by the sender.
        voters: Vec<String>,
    },
    /// Final result delivered to a voter.
    Tally {
        /// Yes votes.
        yes: u64,
        /// No votes.
        no: u64,
        /// Error flag.
        error: bool,
    },
    /// Signals a roster or sum inconsistency to peers.
    Abort {
        /// Human-readable reason.
        reason: String,
        /// Index of the aborting server.
        index: u64,
    },
}

impl Message {
    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::ClientJoin { .. } => "ClientJoin",
            Message::JoinAccepted { .. } => "JoinAccepted",
            Message::RNumber { .. } => "RNumber",
            Message::ServerJoin { .. } => "ServerJoin",
            Message::ServerResponse { .. } => "ServerResponse",
            Message::ClientList { .. } => "ClientList",
            Message::Tally { .. } => "Tally",
            Message::Abort { .. } => "Abort",
        }
    }
}

impl From<Results> for Message {
    fn from(results: Results) -> Self {
        Message::Tally {
            yes: results.yes,
            no: results.no,
            error: results.error,
        }
    }
}

/// Encodes `message` as one newline-terminated frame.
pub fn encode(message: &Message) -> io::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(message)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    frame.push(b'\n');
    if frame.len() > MAX_MESSAGE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "message exceeds frame limit",
        ));
    }
    Ok(frame)
}

/// Decodes one frame (without or with its trailing newline).
pub fn decode(frame: &[u8]) -> io::Result<Message> {
    serde_json::from_slice(frame).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Writes one frame and flushes it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Reads one frame.  Returns `Ok(None)` on a clean end of stream.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = reader
        .take(MAX_MESSAGE_BYTES as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() != Some(&b'\n') {
        let kind = if n >= MAX_MESSAGE_BYTES {
            io::ErrorKind::InvalidData
        } else {
            io::ErrorKind::UnexpectedEof
        };
        return Err(io::Error::new(kind, "truncated or oversized frame"));
    }
    decode(&buf).map(Some)
}
