//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ── conn task ──┐                     ┌── outbox A ──► Client A
//!                         ├─► Command (mpsc) ─► AuthorityActor
//! Client B ── conn task ──┘        │            └── outbox B ──► Client B
//!                                  ▼
//!                        Authority (table, journal,
//!                        checkpoint, seq counter)
//! ```
//!
//! One actor task owns the [`Authority`] and the [`BroadcastGroup`]; nothing
//! else touches authoritative state. Connection tasks decode frames, forward
//! them as commands, and pump their outbox back into the socket. The actor
//! also runs the periodic checkpoint timer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tandem_core::{ClientId, Seq};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::authority::{Authority, AuthorityConfig, DEDUPE_CAPACITY, ID_BLOCK_SIZE};
use crate::broadcast::{BroadcastGroup, Frame, DEFAULT_QUEUE_CAPACITY};
use crate::journal::{CHECKPOINT_INTERVAL, MAX_JOURNAL_LENGTH};
use crate::protocol::{ClientMessage, EphemeralData, OutgoingOp, ProtocolError, ServerMessage};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Identifies one accepted socket, distinct from the client id it claims.
type ConnId = u64;

/// Upper bound on the actor's checkpoint polling period.
const MAX_TICK: Duration = Duration::from_secs(1);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Time between periodic checkpoints
    pub checkpoint_interval: Duration,
    /// Journal length that forces a checkpoint when exceeded
    pub max_journal_len: usize,
    /// Stable ids granted per connection
    pub id_block_size: u64,
    /// Outbox capacity per connection before it is evicted
    pub client_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            checkpoint_interval: CHECKPOINT_INTERVAL,
            max_journal_len: MAX_JOURNAL_LENGTH,
            id_block_size: ID_BLOCK_SIZE,
            client_queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn authority_config(&self) -> AuthorityConfig {
        AuthorityConfig {
            max_journal_len: self.max_journal_len,
            checkpoint_interval: self.checkpoint_interval,
            id_block_size: self.id_block_size,
            dedupe_capacity: DEDUPE_CAPACITY,
        }
    }

    fn tick(&self) -> Duration {
        self.checkpoint_interval.min(MAX_TICK).max(Duration::from_millis(1))
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub accepted_ops: u64,
    pub rejected_ops: u64,
    pub corrections: u64,
    pub evictions: u64,
    pub checkpoints: u64,
    pub head_seq: Seq,
    pub journal_len: usize,
}

/// Requests from connection tasks to the actor.
enum Command {
    Connect {
        conn: ConnId,
        requested: Option<ClientId>,
        reply: oneshot::Sender<(ClientId, mpsc::Receiver<Frame>)>,
    },
    Ops {
        conn: ConnId,
        client_id: ClientId,
        base_seq: Seq,
        ops: Vec<OutgoingOp>,
    },
    Ephemeral {
        conn: ConnId,
        client_id: ClientId,
        data: EphemeralData,
    },
    Disconnect {
        conn: ConnId,
        client_id: ClientId,
    },
}

/// Single owner of authoritative state.
struct AuthorityActor {
    authority: Authority,
    group: BroadcastGroup,
    /// Which socket currently holds each client id.
    sessions: HashMap<ClientId, ConnId>,
    stats: ServerStats,
}

impl AuthorityActor {
    fn new(config: &ServerConfig) -> Self {
        Self {
            authority: Authority::new(config.authority_config()),
            group: BroadcastGroup::new(config.client_queue_capacity),
            sessions: HashMap::new(),
            stats: ServerStats::default(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        shared: Arc<RwLock<ServerStats>>,
        tick: Duration,
    ) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = ticker.tick() => {
                    self.authority.on_timer(Instant::now());
                }
            }
            *shared.write().await = self.snapshot();
        }
        log::info!("Authority actor stopped at seq {}", self.authority.seq());
    }

    fn is_current(&self, client_id: ClientId, conn: ConnId) -> bool {
        self.sessions.get(&client_id) == Some(&conn)
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Connect {
                conn,
                requested,
                reply,
            } => {
                let (client_id, welcome) = match self.authority.connect(requested) {
                    Ok(connected) => connected,
                    Err(e) => {
                        log::warn!("Refusing connection {conn}: {e}");
                        return;
                    }
                };
                let outbox = self.group.add_peer(client_id);
                self.sessions.insert(client_id, conn);
                self.stats.total_connections += 1;

                let evicted = self.deliver(client_id, &welcome);
                if reply.send((client_id, outbox)).is_err() {
                    log::debug!("Connection {conn} went away during handshake");
                    self.drop_client(client_id);
                }
                self.handle_evictions(evicted);
            }

            Command::Ops {
                conn,
                client_id,
                base_seq,
                ops,
            } => {
                if !self.is_current(client_id, conn) {
                    log::debug!("Dropping ops from stale connection {conn}");
                    return;
                }
                self.stats.total_messages += 1;

                let outcome =
                    self.authority
                        .handle_client_ops(client_id, base_seq, ops, Instant::now());
                self.stats.accepted_ops += outcome.accepted.len() as u64;
                self.stats.rejected_ops += outcome.rejected.len() as u64;
                if outcome.correction.is_some() {
                    self.stats.corrections += 1;
                }

                let mut evicted = Vec::new();
                for reply in outcome.replies() {
                    evicted.extend(self.deliver(client_id, &reply));
                }
                if let Some(ops) = outcome.broadcast() {
                    evicted.extend(self.fan_out(&ops, None));
                }
                self.handle_evictions(evicted);
            }

            Command::Ephemeral {
                conn,
                client_id,
                data,
            } => {
                if !self.is_current(client_id, conn) {
                    return;
                }
                self.stats.total_messages += 1;
                log::trace!("Relaying ephemeral data from client {client_id}");
                let relay = self.authority.handle_ephemeral(client_id, data);
                let evicted = self.fan_out(&relay, Some(client_id));
                self.handle_evictions(evicted);
            }

            Command::Disconnect { conn, client_id } => {
                if self.is_current(client_id, conn) {
                    self.drop_client(client_id);
                }
            }
        }
    }

    fn deliver(&mut self, client_id: ClientId, msg: &ServerMessage) -> Vec<ClientId> {
        match self.group.send_to(client_id, msg) {
            Ok(evicted) => evicted.into_iter().collect(),
            Err(e) => {
                log::error!("Failed to encode {}: {e}", msg.type_name());
                Vec::new()
            }
        }
    }

    fn fan_out(&mut self, msg: &ServerMessage, except: Option<ClientId>) -> Vec<ClientId> {
        self.group.broadcast(msg, except).unwrap_or_else(|e| {
            log::error!("Failed to encode {}: {e}", msg.type_name());
            Vec::new()
        })
    }

    /// Remove a client and tell everybody else it left.
    fn drop_client(&mut self, client_id: ClientId) {
        self.group.remove_peer(client_id);
        self.sessions.remove(&client_id);
        if let Some(left) = self.authority.disconnect(client_id) {
            let evicted = self.fan_out(&left, None);
            self.handle_evictions(evicted);
        }
    }

    fn handle_evictions(&mut self, evicted: Vec<ClientId>) {
        let mut pending = evicted;
        while let Some(client_id) = pending.pop() {
            self.stats.evictions += 1;
            self.sessions.remove(&client_id);
            if let Some(left) = self.authority.disconnect(client_id) {
                pending.extend(self.fan_out(&left, None));
            }
        }
    }

    fn snapshot(&self) -> ServerStats {
        ServerStats {
            active_connections: self.sessions.len() as u64,
            head_seq: self.authority.seq(),
            journal_len: self.authority.journal().len(),
            checkpoints: self.authority.journal().stats().checkpoints,
            ..self.stats.clone()
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    stats: Arc<RwLock<ServerStats>>,
    next_conn: Arc<AtomicU64>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            stats: Arc::new(RwLock::new(ServerStats::default())),
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let (tx, rx) = mpsc::channel(self.config.client_queue_capacity.max(16));
        let actor = AuthorityActor::new(&self.config);
        tokio::spawn(actor.run(rx, self.stats.clone(), self.config.tick()));

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
            let commands = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, conn, commands).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Latest statistics published by the actor.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Decode a data frame. Control frames yield `None`.
fn decode_frame(msg: &Message) -> Option<Result<ClientMessage, ProtocolError>> {
    match msg {
        Message::Text(text) => Some(ClientMessage::decode(text.as_str())),
        Message::Binary(data) => Some(ClientMessage::decode_bytes(data)),
        _ => None,
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn: ConnId,
    commands: mpsc::Sender<Command>,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    log::info!("WebSocket connection established from {addr}");

    // Handshake: the first data frame should be Hello; anything else is
    // processed after an implicit empty Hello.
    let (requested, first) = loop {
        match ws_receiver.next().await {
            Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
            Some(Ok(Message::Close(_))) | None => return Ok(()),
            Some(Ok(msg)) => match decode_frame(&msg) {
                Some(Ok(ClientMessage::Hello {
                    client_id,
                    last_seq,
                })) => {
                    log::debug!("Hello from {addr}: client {client_id:?}, last seq {last_seq:?}");
                    break (client_id, None);
                }
                Some(Ok(other)) => break (None, Some(other)),
                Some(Err(e)) => log::warn!("Failed to decode message from {addr}: {e}"),
                None => {}
            },
            Some(Err(e)) => return Err(e.into()),
        }
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    commands
        .send(Command::Connect {
            conn,
            requested,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)?;
    let (client_id, mut outbox) = reply_rx.await.map_err(|_| ProtocolError::ConnectionClosed)?;
    log::info!("{addr} is client {client_id}");

    if let Some(msg) = first {
        forward(&commands, conn, client_id, msg).await?;
    }

    let result: Result<(), BoxError> = async {
        loop {
            tokio::select! {
                msg = ws_receiver.next() => match msg {
                    Some(Ok(Message::Ping(data))) => ws_sender.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection closed from {addr}");
                        break;
                    }
                    Some(Ok(msg)) => match decode_frame(&msg) {
                        Some(Ok(msg)) => forward(&commands, conn, client_id, msg).await?,
                        Some(Err(e)) => log::warn!("Failed to decode message from client {client_id}: {e}"),
                        None => {}
                    },
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                },

                frame = outbox.recv() => match frame {
                    Some(frame) => {
                        ws_sender.send(Message::Text(String::from(&*frame).into())).await?;
                    }
                    None => {
                        log::warn!("Client {client_id} evicted, closing connection");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
        Ok(())
    }
    .await;

    let _ = commands.send(Command::Disconnect { conn, client_id }).await;
    result
}

/// Turn a decoded client message into an actor command.
async fn forward(
    commands: &mpsc::Sender<Command>,
    conn: ConnId,
    client_id: ClientId,
    msg: ClientMessage,
) -> Result<(), ProtocolError> {
    let cmd = match msg {
        ClientMessage::Hello { .. } => {
            log::debug!("Ignoring repeated Hello from client {client_id}");
            return Ok(());
        }
        ClientMessage::ClientOps {
            client_id: claimed,
            base_seq,
            ops,
        } => {
            if claimed != client_id {
                log::warn!("Client {client_id} sent ops as {claimed}");
            }
            Command::Ops {
                conn,
                client_id,
                base_seq,
                ops,
            }
        }
        ClientMessage::ClientEphemeral { data, .. } => Command::Ephemeral {
            conn,
            client_id,
            data,
        },
    };
    commands
        .send(cmd)
        .await
        .map_err(|_| ProtocolError::ConnectionClosed)
}
