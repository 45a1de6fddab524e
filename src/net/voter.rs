#![cfg(feature = "net")]

//! Voter client: shares one vote across the tally servers and waits for
//! their results.

use crate::decoder::{POLY_DEGREE, SERVER_COUNT};
use crate::field::Field;
use crate::net::node::NetworkError;
use crate::net::schema::{read_message, write_message, Message};
use crate::sharing::secrify;
use crate::tally::Results;
use rand::Rng;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time;

struct ServerLink {
    index: u64,
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A voter registered with every tally server.
pub struct VoterClient {
    identity: String,
    field: Field,
    links: Vec<ServerLink>,
}

impl VoterClient {
    /// Connects to every server in `servers` and registers `identity`.
    ///
    /// Each server answers with its index; shares are routed by that index,
    /// so the order of `servers` does not matter.
    pub async fn connect(
        identity: &str,
        prime: u64,
        servers: &[SocketAddr],
        io_timeout: Duration,
    ) -> Result<Self, NetworkError> {
        let field = Field::new(prime).map_err(crate::net::config::ConfigError::from)?;
        if servers.len() != SERVER_COUNT {
            return Err(NetworkError::ConnectionFailure(format!(
                "{} servers given, expected {SERVER_COUNT}",
                servers.len()
            )));
        }
        let mut links = Vec::with_capacity(SERVER_COUNT);
        let mut seen = HashSet::new();
        for &addr in servers {
            let link = join(identity, addr, io_timeout).await?;
            if !(1..=SERVER_COUNT as u64).contains(&link.index) || !seen.insert(link.index) {
                return Err(NetworkError::ProtocolViolation(format!(
                    "server at {addr} claimed index {}",
                    link.index
                )));
            }
            tracing::debug!(voter = identity, server = link.index, %addr, "joined server");
            links.push(link);
        }
        links.sort_by_key(|link| link.index);
        Ok(Self {
            identity: identity.to_string(),
            field,
            links,
        })
    }

    /// Splits `vote` into shares and sends each server its own.
    pub async fn cast<R: Rng + ?Sized>(&mut self, vote: u64, rng: &mut R) -> Result<(), NetworkError> {
        let shares = secrify(&self.field, vote, POLY_DEGREE, SERVER_COUNT, rng)?;
        for link in &mut self.links {
            let share = shares[(link.index - 1) as usize];
            write_message(&mut link.writer, &Message::RNumber { value: share as i64 })
                .await
                .map_err(|err| {
                    NetworkError::ConnectionFailure(format!("server {} at {}: {err}", link.index, link.addr))
                })?;
        }
        tracing::info!(voter = %self.identity, "vote cast");
        Ok(())
    }

    /// Waits for every server's tally.
    ///
    /// A server that closes its connection without a tally is reported as an
    /// error result for that server.
    pub async fn await_tally(self) -> Vec<(u64, Results)> {
        let identity = self.identity;
        let mut tallies = Vec::with_capacity(self.links.len());
        for mut link in self.links {
            let results = loop {
                match read_message(&mut link.reader).await {
                    Ok(Some(Message::Tally { yes, no, error })) => break Results { yes, no, error },
                    Ok(Some(other)) => {
                        tracing::debug!(voter = %identity, server = link.index, kind = other.kind(), "ignoring message");
                    }
                    Ok(None) => {
                        tracing::warn!(voter = %identity, server = link.index, "server closed without a tally");
                        break Results::error();
                    }
                    Err(err) => {
                        tracing::warn!(voter = %identity, server = link.index, %err, "tally read failed");
                        break Results::error();
                    }
                }
            };
            tracing::info!(
                voter = %identity,
                server = link.index,
                yes = results.yes,
                no = results.no,
                error = results.error,
                "tally received"
            );
            tallies.push((link.index, results));
        }
        tallies
    }
}

/// Connects, votes, and waits for the tallies in one call.
pub async fn vote<R: Rng + ?Sized>(
    identity: &str,
    vote: u64,
    prime: u64,
    servers: &[SocketAddr],
    io_timeout: Duration,
    rng: &mut R,
) -> Result<Vec<(u64, Results)>, NetworkError> {
    let mut client = VoterClient::connect(identity, prime, servers, io_timeout).await?;
    client.cast(vote, rng).await?;
    Ok(client.await_tally().await)
}

async fn join(identity: &str, addr: SocketAddr, io_timeout: Duration) -> Result<ServerLink, NetworkError> {
    let stream = match time::timeout(io_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            return Err(NetworkError::ConnectionFailure(format!("{addr}: {err}")));
        }
        Err(_) => return Err(NetworkError::Timeout(format!("connecting to {addr}"))),
    };
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    write_message(
        &mut writer,
        &Message::ClientJoin {
            identity: identity.to_string(),
        },
    )
    .await
    .map_err(|err| NetworkError::ConnectionFailure(format!("{addr}: {err}")))?;
    let reply = time::timeout(io_timeout, read_message(&mut reader))
        .await
        .map_err(|_| NetworkError::Timeout(format!("join acknowledgement from {addr}")))?;
    match reply {
        Ok(Some(Message::JoinAccepted { index })) => Ok(ServerLink {
            index,
            addr,
            reader,
            writer,
        }),
        Ok(Some(other)) => Err(NetworkError::ProtocolViolation(format!(
            "expected JoinAccepted from {addr}, got {}",
            other.kind()
        ))),
        Ok(None) => Err(NetworkError::ConnectionFailure(format!(
            "{addr} refused the join"
        ))),
        Err(err) => Err(NetworkError::ConnectionFailure(format!("{addr}: {err}"))),
    }
}
