#![cfg(feature = "net")]

//! Tally server runtime.
//!
//! A server runs one acceptor task, a reader and a writer task per
//! connection, the window and deadline timers, and a single coordinator
//! that owns all protocol state.  Every other task talks to the coordinator
//! through an [`Event`] channel, and the coordinator writes to connections
//! through per-connection queues.  Only the coordinator inspects or drains
//! the point collector, so a round is decoded exactly once.

use crate::decoder::{Decoded, RobustDecoder, SERVER_COUNT};
use crate::field::Field;
use crate::net::config::{ConfigError, NodeConfig};
use crate::net::schema::{read_message, write_message, Message};
use crate::roster::{compare, ConnId, VoterRegistry};
use crate::sharing::{Point, SharingError};
use crate::tally::Results;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;

/// Errors surfaced by servers and voter clients.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Invalid configuration, detected before any network activity.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// A required peer or server could not be reached.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    /// A message arrived that the protocol does not allow at that point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Peers reported diverging voter rosters.
    #[error("roster mismatch with server {peer}")]
    RosterMismatch {
        /// Index of the disagreeing peer.
        peer: u64,
    },
    /// A deadline expired.
    #[error("timed out: {0}")]
    Timeout(String),
    /// The vote could not be shared.
    #[error(transparent)]
    Sharing(#[from] SharingError),
    /// Socket failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The server was halted before it tallied.
    #[error("server halted before tallying")]
    Halted,
    /// The coordinator stopped without producing results.
    #[error("server stopped without a result")]
    Stopped,
}

/// Protocol phase of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Configuration loaded, nothing opened yet.
    Init,
    /// Dialing configured peers.
    Connecting,
    /// Accepting voters.
    CollectingVotes,
    /// Window closed; comparing rosters with peers.
    ExchangingRosters,
    /// Computing the local partial sum.
    Summing,
    /// Waiting for every server's partial sum.
    AwaitingPartialSums,
    /// Results published.
    Tallied,
    /// Round abandoned; the error tally was published.
    Aborted,
}

impl Phase {
    /// Returns true for `Tallied` and `Aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Tallied | Phase::Aborted)
    }
}

/// Bounded buffer holding one point per server.
///
/// The full set is handed out exactly once; afterwards every offer is
/// rejected.
#[derive(Debug)]
pub struct PointCollector {
    capacity: usize,
    points: BTreeMap<u64, i64>,
    drained: bool,
}

/// Reasons a point is refused by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CollectError {
    /// This server already reported.
    #[error("server {0} already reported a partial sum")]
    Duplicate(u64),
    /// The round was already decoded.
    #[error("round already decoded")]
    Drained,
}

impl PointCollector {
    /// Creates an empty collector for `capacity` servers.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: BTreeMap::new(),
            drained: false,
        }
    }

    /// Adds a point.  Returns every point once the buffer fills.
    pub fn offer(&mut self, point: Point) -> Result<Option<Vec<Point>>, CollectError> {
        if self.drained {
            return Err(CollectError::Drained);
        }
        if self.points.contains_key(&point.x) {
            return Err(CollectError::Duplicate(point.x));
        }
        self.points.insert(point.x, point.y);
        if self.points.len() < self.capacity {
            return Ok(None);
        }
        self.drained = true;
        Ok(Some(
            std::mem::take(&mut self.points)
                .into_iter()
                .map(|(x, y)| Point { x, y })
                .collect(),
        ))
    }

    /// Number of buffered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

type Outbox = mpsc::UnboundedSender<Message>;

enum Event {
    Opened {
        conn: ConnId,
        outbox: Outbox,
        kill: oneshot::Sender<()>,
        dialed: Option<u64>,
    },
    Frame {
        conn: ConnId,
        message: Message,
    },
    Closed {
        conn: ConnId,
    },
    DialsDone,
    WindowElapsed,
    RoundDeadline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Pending,
    Dialing(u64),
    Voter,
    Peer(u64),
}

struct Connection {
    outbox: Outbox,
    // Dropping this ends the reader task.
    _kill: oneshot::Sender<()>,
    role: Role,
}

#[derive(Debug)]
struct PeerServer {
    identity: String,
    conn: ConnId,
    dialer: u64,
    roster_agrees: bool,
    roster_compared: bool,
}

/// A configured, validated tally server.
pub struct ServerNode {
    config: NodeConfig,
    field: Field,
}

/// Handle to a running server.
pub struct NodeHandle {
    local_addr: SocketAddr,
    halt: watch::Sender<bool>,
    phase: watch::Receiver<Phase>,
    outcome: JoinHandle<Result<Results, NetworkError>>,
}

impl NodeHandle {
    /// Address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current protocol phase.
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Closes the listener and abandons the round.
    pub fn halt(&self) {
        let _ = self.halt.send(true);
    }

    /// Waits for the round to finish.
    ///
    /// Dropping the handle without awaiting this halts the server.
    pub async fn results(self) -> Result<Results, NetworkError> {
        let NodeHandle { halt, outcome, .. } = self;
        let outcome = outcome.await;
        drop(halt);
        outcome.map_err(|_| NetworkError::Stopped)?
    }
}

impl ServerNode {
    /// Validates `config`.  Configuration errors are fatal here, before any
    /// socket is opened.
    pub fn new(config: NodeConfig) -> Result<Self, NetworkError> {
        let field = config.validate()?;
        tracing::info!(
            index = config.index,
            identity = %config.identity,
            main = config.main,
            prime = field.modulus(),
            "server configured"
        );
        Ok(Self { config, field })
    }

    /// Binds the configured listen address and starts the server.
    pub async fn start(self) -> Result<NodeHandle, NetworkError> {
        let listener = TcpListener::bind(self.config.listen).await.map_err(|err| {
            NetworkError::ConnectionFailure(format!("bind {}: {err}", self.config.listen))
        })?;
        self.start_on(listener)
    }

    /// Starts the server on an already bound listener.
    pub fn start_on(self, listener: TcpListener) -> Result<NodeHandle, NetworkError> {
        let local_addr = listener.local_addr()?;
        let index = self.config.index;
        tracing::info!(index, addr = %local_addr, "listening");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (halt_tx, halt_rx) = watch::channel(false);
        let (phase_tx, phase_rx) = watch::channel(Phase::Init);
        let next_conn = Arc::new(AtomicU64::new(1));

        tokio::spawn(accept_loop(
            listener,
            events_tx.clone(),
            Arc::clone(&next_conn),
            halt_rx.clone(),
            index,
        ));

        let mut coordinator =
            Coordinator::new(self.config, self.field, events_tx.clone(), phase_tx);
        coordinator.set_phase(Phase::Connecting);
        tokio::spawn(dial_peers(coordinator.config.clone(), events_tx, next_conn));
        let outcome = tokio::spawn(coordinator.run(events_rx, halt_rx));

        Ok(NodeHandle {
            local_addr,
            halt: halt_tx,
            phase: phase_rx,
            outcome,
        })
    }

    /// Runs the server until it tallies or is halted.
    pub async fn run(self) -> Result<Results, NetworkError> {
        self.start().await?.results().await
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<Event>,
    next_conn: Arc<AtomicU64>,
    mut halt: watch::Receiver<bool>,
    index: u64,
) {
    loop {
        tokio::select! {
            _ = halt.changed() => break,
            _ = events.closed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let conn = next_conn.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(index, conn, %addr, "accepted connection");
                    spawn_connection(stream, conn, None, events.clone());
                }
                Err(err) => {
                    tracing::error!(index, %err, "accept failed");
                    break;
                }
            },
        }
    }
    tracing::debug!(index, "listener closed");
}

async fn dial_peers(
    config: NodeConfig,
    events: mpsc::UnboundedSender<Event>,
    next_conn: Arc<AtomicU64>,
) {
    for peer in &config.peers {
        match time::timeout(config.io_timeout(), TcpStream::connect(peer.addr)).await {
            Ok(Ok(stream)) => {
                let conn = next_conn.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(index = config.index, peer = peer.index, addr = %peer.addr, "dialed peer");
                spawn_connection(stream, conn, Some(peer.index), events.clone());
            }
            Ok(Err(err)) => {
                tracing::info!(
                    index = config.index,
                    peer = peer.index,
                    %err,
                    "peer unreachable, waiting for it to dial in"
                );
            }
            Err(_) => {
                tracing::info!(
                    index = config.index,
                    peer = peer.index,
                    "dial timed out, waiting for peer to dial in"
                );
            }
        }
    }
    let _ = events.send(Event::DialsDone);
}

fn spawn_connection(
    stream: TcpStream,
    conn: ConnId,
    dialed: Option<u64>,
    events: mpsc::UnboundedSender<Event>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (outbox, mut queue) = mpsc::unbounded_channel::<Message>();
    let (kill, mut killed) = oneshot::channel::<()>();

    tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(err) = write_message(&mut write_half, &message).await {
                tracing::debug!(conn, %err, kind = message.kind(), "write failed");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    if events
        .send(Event::Opened {
            conn,
            outbox,
            kill,
            dialed,
        })
        .is_err()
    {
        return;
    }

    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            let frame = tokio::select! {
                _ = &mut killed => return,
                frame = read_message(&mut reader) => frame,
            };
            match frame {
                Ok(Some(message)) => {
                    if events.send(Event::Frame { conn, message }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(conn, %err, "read failed");
                    break;
                }
            }
        }
        let _ = events.send(Event::Closed { conn });
    });
}

struct Coordinator {
    config: NodeConfig,
    field: Field,
    decoder: RobustDecoder,
    rng: StdRng,
    events: mpsc::UnboundedSender<Event>,
    phase: Phase,
    phase_tx: watch::Sender<Phase>,
    connections: HashMap<ConnId, Connection>,
    voters: VoterRegistry,
    peers: BTreeMap<u64, PeerServer>,
    roster: Option<BTreeSet<String>>,
    last_peer_list: Option<Vec<String>>,
    intersection: BTreeSet<String>,
    collector: PointCollector,
    partial_sum: Option<i64>,
    consistent: bool,
    window_started: bool,
    results: Option<Results>,
}

impl Coordinator {
    fn new(
        config: NodeConfig,
        field: Field,
        events: mpsc::UnboundedSender<Event>,
        phase_tx: watch::Sender<Phase>,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            decoder: RobustDecoder::new(field),
            field,
            rng,
            events,
            phase: Phase::Init,
            phase_tx,
            connections: HashMap::new(),
            voters: VoterRegistry::new(),
            peers: BTreeMap::new(),
            roster: None,
            last_peer_list: None,
            intersection: BTreeSet::new(),
            collector: PointCollector::new(SERVER_COUNT),
            partial_sum: None,
            consistent: true,
            window_started: false,
            results: None,
            config,
        }
    }

    fn index(&self) -> u64 {
        self.config.index
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<Event>,
        mut halt: watch::Receiver<bool>,
    ) -> Result<Results, NetworkError> {
        loop {
            tokio::select! {
                changed = halt.changed() => {
                    if changed.is_err() || *halt.borrow() {
                        tracing::info!(index = self.index(), phase = ?self.phase, "halted");
                        return Err(NetworkError::Halted);
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        return Err(NetworkError::Stopped);
                    };
                    self.handle(event);
                    if let Some(results) = self.results {
                        return Ok(results);
                    }
                }
            }
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::debug!(index = self.index(), from = ?self.phase, to = ?phase, "phase change");
            self.phase = phase;
            let _ = self.phase_tx.send(phase);
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Opened {
                conn,
                outbox,
                kill,
                dialed,
            } => self.on_opened(conn, outbox, kill, dialed),
            Event::Frame { conn, message } => self.on_frame(conn, message),
            Event::Closed { conn } => self.on_closed(conn),
            Event::DialsDone => {
                if self.phase == Phase::Connecting {
                    self.set_phase(Phase::CollectingVotes);
                }
            }
            Event::WindowElapsed => {
                tracing::info!(index = self.index(), "voting window elapsed");
                self.close_window();
            }
            Event::RoundDeadline => {
                if self.results.is_none() {
                    tracing::warn!(index = self.index(), phase = ?self.phase, "round deadline exceeded");
                    self.abort(NetworkError::Timeout("round deadline exceeded".into()).to_string());
                }
            }
        }
    }

    fn on_opened(
        &mut self,
        conn: ConnId,
        outbox: Outbox,
        kill: oneshot::Sender<()>,
        dialed: Option<u64>,
    ) {
        let role = dialed.map_or(Role::Pending, Role::Dialing);
        if dialed.is_some() {
            let _ = outbox.send(Message::ServerJoin {
                identity: self.config.identity.clone(),
                index: self.index(),
            });
        }
        self.connections.insert(
            conn,
            Connection {
                outbox,
                _kill: kill,
                role,
            },
        );
    }

    fn on_frame(&mut self, conn: ConnId, message: Message) {
        let Some(role) = self.connections.get(&conn).map(|c| c.role) else {
            return;
        };
        match (role, message) {
            (Role::Pending, Message::ClientJoin { identity }) => self.on_client_join(conn, identity),
            (Role::Pending, Message::ServerJoin { identity, index }) => {
                if self.register_peer(conn, identity, index, index) {
                    self.send(
                        conn,
                        Message::ServerResponse {
                            identity: self.config.identity.clone(),
                            index: self.index(),
                        },
                    );
                }
            }
            (Role::Dialing(expected), Message::ServerResponse { identity, index }) if index == expected => {
                self.register_peer(conn, identity, index, self.index());
            }
            (Role::Pending, Message::RNumber { .. }) => {
                tracing::warn!(index = self.index(), conn, "unregistered voter attempted to vote");
            }
            (Role::Voter, Message::RNumber { value }) => self.on_share(conn, value),
            (Role::Peer(peer), Message::ClientList { voters }) => self.on_client_list(peer, voters),
            (Role::Peer(peer), Message::RNumber { value }) => {
                self.offer(Point { x: peer, y: value });
            }
            (Role::Peer(peer), Message::Abort { reason, index }) => {
                tracing::warn!(index = self.index(), peer, claimed = index, %reason, "abort received");
                self.finish(Phase::Aborted, Results::error());
            }
            (role, message) => {
                let err = NetworkError::ProtocolViolation(format!(
                    "{} not allowed on {role:?} connection",
                    message.kind()
                ));
                tracing::warn!(index = self.index(), conn, %err, "dropping connection");
                self.drop_connection(conn);
            }
        }
    }

    fn on_client_join(&mut self, conn: ConnId, identity: String) {
        match self.voters.join(conn, &identity) {
            Ok(()) => {
                if let Some(c) = self.connections.get_mut(&conn) {
                    c.role = Role::Voter;
                }
                tracing::info!(index = self.index(), voter = %identity, "registered voter");
                self.send(conn, Message::JoinAccepted { index: self.index() });
            }
            Err(err) => {
                tracing::warn!(index = self.index(), voter = %identity, %err, "join rejected");
                self.drop_connection(conn);
            }
        }
    }

    fn on_share(&mut self, conn: ConnId, value: i64) {
        if !self.field.contains(value) {
            tracing::warn!(index = self.index(), conn, value, "share outside the field dropped");
            return;
        }
        if let Err(err) = self.voters.submit(conn, value as u64) {
            tracing::warn!(index = self.index(), conn, %err, "share dropped");
        }
    }

    /// Registers `conn` as the link to peer `index`.  When both servers of a
    /// pair dialed each other, both keep the connection dialed by the lower
    /// index.  Returns false if `conn` was dropped.
    fn register_peer(&mut self, conn: ConnId, identity: String, index: u64, dialer: u64) -> bool {
        if index == self.index() || !self.config.peers.iter().any(|p| p.index == index) {
            tracing::warn!(index = self.index(), claimed = index, "unknown server index");
            self.drop_connection(conn);
            return false;
        }
        let canonical = self.index().min(index);
        if let Some(existing) = self.peers.get(&index) {
            if existing.dialer == canonical || dialer != canonical {
                tracing::debug!(index = self.index(), peer = index, conn, "duplicate peer link dropped");
                self.drop_connection(conn);
                return false;
            }
            let stale = existing.conn;
            self.connections.remove(&stale);
        }
        if let Some(c) = self.connections.get_mut(&conn) {
            c.role = Role::Peer(index);
        }
        tracing::info!(index = self.index(), peer = index, identity = %identity, "connected with partner server");
        self.peers.insert(
            index,
            PeerServer {
                identity,
                conn,
                dialer,
                roster_agrees: false,
                roster_compared: false,
            },
        );
        self.maybe_open_window();
        true
    }

    fn maybe_open_window(&mut self) {
        if !self.config.main || self.window_started || self.roster.is_some() {
            return;
        }
        if self.peers.len() < self.config.peer_threshold {
            return;
        }
        self.window_started = true;
        let window = self.config.window();
        tracing::info!(index = self.index(), ?window, "voting window opened");
        self.schedule(window, Event::WindowElapsed);
    }

    fn schedule(&self, delay: std::time::Duration, event: Event) {
        let events = self.events.clone();
        tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = events.send(event);
        });
    }

    fn close_window(&mut self) {
        if self.voters.is_closed() || self.phase.is_terminal() {
            return;
        }
        self.voters.close();
        let roster = self.voters.current_voter_set();
        if self.voters.is_empty() {
            tracing::warn!(index = self.index(), "voting window closed with no voters");
        }
        tracing::info!(
            index = self.index(),
            registered = self.voters.len(),
            voters = roster.len(),
            "voting window closed"
        );
        let reported = self
            .config
            .behaviour
            .roster(&roster, self.last_peer_list.as_deref());
        if !self.config.behaviour.is_honest() {
            tracing::warn!(index = self.index(), reported = reported.len(), "reporting altered roster");
        }
        self.intersection = roster.clone();
        self.roster = Some(roster);
        self.set_phase(Phase::ExchangingRosters);
        self.broadcast(Message::ClientList { voters: reported });
        self.schedule(self.config.round_timeout(), Event::RoundDeadline);
    }

    fn on_client_list(&mut self, peer: u64, voters: Vec<String>) {
        if self.phase.is_terminal() {
            return;
        }
        if self.peers.get(&peer).map_or(false, |p| p.roster_compared) {
            tracing::warn!(index = self.index(), peer, "second roster ignored");
            return;
        }
        self.last_peer_list = Some(voters.clone());
        self.close_window();
        let Some(local) = self.roster.as_ref() else {
            return;
        };
        let cmp = compare(local, &voters);
        if let Some(p) = self.peers.get_mut(&peer) {
            p.roster_compared = true;
            p.roster_agrees = cmp.agrees;
        }
        if !cmp.agrees {
            self.consistent = false;
            let err = NetworkError::RosterMismatch { peer };
            tracing::warn!(
                index = self.index(),
                peer,
                local = local.len(),
                reported = voters.len(),
                common = cmp.common.len(),
                "roster mismatch"
            );
            self.abort(err.to_string());
            return;
        }
        self.intersection = self.intersection.intersection(&cmp.common).cloned().collect();
        let all_agree = self.config.peers.iter().all(|p| {
            self.peers
                .get(&p.index)
                .map_or(false, |s| s.roster_compared && s.roster_agrees)
        });
        if all_agree && self.phase == Phase::ExchangingRosters {
            self.sum();
        }
    }

    fn sum(&mut self) {
        self.set_phase(Phase::Summing);
        let honest = self.voters.partial_sum(&self.field, &self.intersection);
        let reported = self
            .config
            .behaviour
            .partial_sum(&self.field, honest, &mut self.rng);
        if reported != honest as i64 {
            tracing::warn!(index = self.index(), honest, reported, "reporting altered partial sum");
        }
        tracing::info!(
            index = self.index(),
            voters = self.intersection.len(),
            partial_sum = reported,
            "partial sum computed"
        );
        self.partial_sum = Some(reported);
        self.broadcast(Message::RNumber { value: reported });
        self.set_phase(Phase::AwaitingPartialSums);
        self.offer(Point {
            x: self.index(),
            y: reported,
        });
    }

    fn offer(&mut self, point: Point) {
        if self.phase.is_terminal() {
            return;
        }
        match self.collector.offer(point) {
            Ok(Some(points)) => self.tally(points),
            Ok(None) => {
                tracing::debug!(index = self.index(), from = point.x, gathered = self.collector.len(), "partial sum received");
            }
            Err(err) => tracing::warn!(index = self.index(), %err, "partial sum ignored"),
        }
    }

    fn tally(&mut self, points: Vec<Point>) {
        tracing::info!(index = self.index(), ?points, "decoding partial sums");
        let decoded = self.decoder.decode(&points, self.index());
        match &decoded {
            Ok(Decoded::Corrected { faulty, .. }) => {
                self.consistent = false;
                tracing::warn!(index = self.index(), faulty, "corrected a faulty partial sum");
            }
            Ok(Decoded::Consistent { .. }) => {}
            Err(_) => self.consistent = false,
        }
        let results = Results::from_decoded(decoded, self.intersection.len());
        self.finish(Phase::Tallied, results);
    }

    fn abort(&mut self, reason: String) {
        if self.phase.is_terminal() {
            return;
        }
        self.broadcast(Message::Abort {
            reason,
            index: self.index(),
        });
        self.finish(Phase::Aborted, Results::error());
    }

    /// Publishes `results` to every voter and closes all connections.
    fn finish(&mut self, phase: Phase, results: Results) {
        if self.phase.is_terminal() {
            return;
        }
        self.set_phase(phase);
        self.results = Some(results);
        tracing::info!(
            index = self.index(),
            yes = results.yes,
            no = results.no,
            error = results.error,
            consistent = self.consistent,
            "tally"
        );
        let voters: Vec<ConnId> = self.voters.connections().collect();
        for conn in voters {
            self.send(conn, results.into());
        }
        // Queued frames are still flushed by the writer tasks.
        self.connections.clear();
        for (index, peer) in &self.peers {
            tracing::debug!(index = self.index(), peer = index, identity = %peer.identity, "closing peer link");
        }
    }

    fn on_closed(&mut self, conn: ConnId) {
        if self.connections.contains_key(&conn) {
            self.drop_connection(conn);
        }
    }

    fn drop_connection(&mut self, conn: ConnId) {
        let Some(c) = self.connections.remove(&conn) else {
            return;
        };
        match c.role {
            Role::Voter => {
                if self.voters.remove(conn).is_some() {
                    tracing::info!(index = self.index(), conn, "voter left before the window closed");
                }
            }
            Role::Peer(peer) => {
                if self.peers.get(&peer).map_or(false, |p| p.conn == conn) {
                    self.peers.remove(&peer);
                    tracing::warn!(index = self.index(), peer, phase = ?self.phase, "partner server disconnected");
                }
            }
            Role::Pending | Role::Dialing(_) => {}
        }
    }

    fn send(&self, conn: ConnId, message: Message) {
        if let Some(c) = self.connections.get(&conn) {
            let _ = c.outbox.send(message);
        }
    }

    fn broadcast(&self, message: Message) {
        for peer in self.peers.values() {
            self.send(peer.conn, message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_drains_exactly_once() {
        let mut collector = PointCollector::new(4);
        for x in 1..=3 {
            assert_eq!(collector.offer(Point::new(x, x * 10)).unwrap(), None);
        }
        assert_eq!(
            collector.offer(Point::new(2, 99)),
            Err(CollectError::Duplicate(2))
        );
        let points = collector.offer(Point::new(4, 40)).unwrap().unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points[3], Point::new(4, 40));
        assert!(collector.is_empty());
        assert_eq!(
            collector.offer(Point::new(1, 10)),
            Err(CollectError::Drained)
        );
    }

    #[test]
    fn terminal_phases() {
        assert!(Phase::Tallied.is_terminal());
        assert!(Phase::Aborted.is_terminal());
        assert!(!Phase::AwaitingPartialSums.is_terminal());
    }
}
