//! The authority: single owner of the canonical shape table.
//!
//! ```text
//!   ClientOps{baseSeq, ops}
//!          │
//!   baseSeq < checkpoint.seq ? ──yes──► Correction (whole batch refused)
//!          │ no
//!          ▼
//!   for op in ops:
//!      duplicate? ──► Reject
//!      apply      ──► Err ──► Reject            (no seq consumed)
//!          │ Ok
//!          ▼
//!      seq += 1, journal, maybe checkpoint
//!          │
//!          ▼
//!   ServerOps{accepted} ──► every connection
//! ```
//!
//! `Authority` does no I/O. The server's actor task owns exactly one and
//! turns its outcomes into messages.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tandem_core::{ApplyError, ClientId, Op, Seq, ShapeId, ShapeTable};
use thiserror::Error;

use crate::journal::{Journal, CHECKPOINT_INTERVAL, MAX_JOURNAL_LENGTH};
use crate::protocol::{
    ClientOpId, EphemeralData, EphemeralSnapshot, LiveTransform, OutgoingOp, Presence,
    SequencedOp, ServerMessage,
};

/// Size of the stable-id range granted to each connection.
pub const ID_BLOCK_SIZE: u64 = 1_000_000;

/// How many accepted client op ids are remembered for duplicate detection.
pub const DEDUPE_CAPACITY: usize = 4096;

#[derive(Debug, Clone)]
pub struct AuthorityConfig {
    /// Journal length that forces a checkpoint when exceeded
    pub max_journal_len: usize,
    /// Time between periodic checkpoints
    pub checkpoint_interval: Duration,
    /// Stable ids granted per connection
    pub id_block_size: u64,
    /// Accepted op ids remembered for duplicate suppression
    pub dedupe_capacity: usize,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            max_journal_len: MAX_JOURNAL_LENGTH,
            checkpoint_interval: CHECKPOINT_INTERVAL,
            id_block_size: ID_BLOCK_SIZE,
            dedupe_capacity: DEDUPE_CAPACITY,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("no id block left for client {0} (block size {1})")]
    IdSpaceExhausted(ClientId, u64),
}

/// A refused op and the reason sent back to its author.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub client_op_id: ClientOpId,
    pub reason: String,
}

/// Result of one `ClientOps` batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub accepted: Vec<SequencedOp>,
    pub rejected: Vec<Rejection>,
    /// Set when the whole batch was refused for being stale.
    pub correction: Option<ServerMessage>,
}

impl BatchOutcome {
    /// Messages for the sender only, in order.
    pub fn replies(&self) -> Vec<ServerMessage> {
        let mut replies: Vec<ServerMessage> = self
            .rejected
            .iter()
            .map(|r| ServerMessage::Reject {
                client_op_id: r.client_op_id,
                reason: r.reason.clone(),
            })
            .collect();
        replies.extend(self.correction.clone());
        replies
    }

    /// `ServerOps` for every connection, if anything was accepted.
    pub fn broadcast(&self) -> Option<ServerMessage> {
        if self.accepted.is_empty() {
            None
        } else {
            Some(ServerMessage::ServerOps {
                ops: self.accepted.clone(),
            })
        }
    }
}

/// Bounded FIFO set of recently accepted client op ids.
#[derive(Debug, Clone)]
struct RecentOps {
    order: VecDeque<ClientOpId>,
    ids: HashSet<ClientOpId>,
    capacity: usize,
}

impl RecentOps {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, id: &ClientOpId) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: ClientOpId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct EphemeralState {
    presence: Option<Presence>,
    transform: Option<Vec<LiveTransform>>,
}

pub struct Authority {
    config: AuthorityConfig,
    table: ShapeTable,
    journal: Journal,
    recent: RecentOps,
    connected: HashSet<ClientId>,
    ephemeral: BTreeMap<ClientId, EphemeralState>,
    next_index: u64,
}

impl Authority {
    pub fn new(config: AuthorityConfig) -> Self {
        let journal = Journal::new(config.max_journal_len);
        let recent = RecentOps::new(config.dedupe_capacity);
        Self {
            config,
            table: ShapeTable::new(),
            journal,
            recent,
            connected: HashSet::new(),
            ephemeral: BTreeMap::new(),
            next_index: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(AuthorityConfig::default())
    }

    /// Validate `op` against the canonical table and apply it.
    pub fn apply_op(&mut self, op: &Op) -> Result<(), ApplyError> {
        self.table.apply(op)
    }

    /// Register a new connection and build its `Welcome`.
    ///
    /// A requested id is honored only if this authority issued it earlier and
    /// nobody currently holds it, so a client reconnecting after a drop keeps
    /// its id block. Anything else gets a fresh index.
    pub fn connect(
        &mut self,
        requested: Option<ClientId>,
    ) -> Result<(ClientId, ServerMessage), AuthorityError> {
        let client_id = match requested {
            Some(id) if id > 0 && id < self.next_index && !self.connected.contains(&id) => id,
            Some(id) => {
                if id >= self.next_index {
                    log::warn!("Ignoring unissued client id {id} in Hello");
                }
                self.issue_index()?
            }
            None => self.issue_index()?,
        };
        let id_base = self.id_base(client_id)?;
        self.connected.insert(client_id);

        let ephemeral = self
            .ephemeral
            .iter()
            .filter(|(id, _)| **id != client_id)
            .map(|(id, state)| EphemeralSnapshot {
                client_id: *id,
                presence: state.presence.clone(),
                transform: state.transform.clone(),
            })
            .collect();

        log::info!(
            "Client {client_id} connected at seq {} ({} online)",
            self.seq(),
            self.connected.len()
        );

        let welcome = ServerMessage::Welcome {
            client_id,
            id_base,
            checkpoint: self.journal.checkpoint().clone(),
            ops: self.journal.entries().to_vec(),
            ephemeral,
        };
        Ok((client_id, welcome))
    }

    fn issue_index(&mut self) -> Result<ClientId, AuthorityError> {
        let id = self.next_index;
        self.id_base(id)?;
        self.next_index = id
            .checked_add(1)
            .ok_or(AuthorityError::IdSpaceExhausted(id, self.config.id_block_size))?;
        Ok(id)
    }

    /// Drop a connection. Returns the `UserLeft` to broadcast.
    pub fn disconnect(&mut self, client_id: ClientId) -> Option<ServerMessage> {
        self.ephemeral.remove(&client_id);
        if self.connected.remove(&client_id) {
            log::info!("Client {client_id} left ({} online)", self.connected.len());
            Some(ServerMessage::UserLeft { client_id })
        } else {
            None
        }
    }

    /// Sequence and apply a batch of client ops.
    pub fn handle_client_ops(
        &mut self,
        client_id: ClientId,
        base_seq: Seq,
        ops: Vec<OutgoingOp>,
        now: Instant,
    ) -> BatchOutcome {
        let checkpoint_seq = self.journal.checkpoint().seq;
        if base_seq < checkpoint_seq {
            let reason = format!(
                "base seq {base_seq} is older than checkpoint {checkpoint_seq}"
            );
            log::warn!("Correction for client {client_id}: {reason}");
            return BatchOutcome {
                correction: Some(self.correction(Some(reason))),
                ..BatchOutcome::default()
            };
        }

        let mut outcome = BatchOutcome::default();
        for OutgoingOp { client_op_id, op } in ops {
            if self.recent.contains(&client_op_id) {
                outcome.rejected.push(Rejection {
                    client_op_id,
                    reason: format!("duplicate operation {client_op_id}"),
                });
                continue;
            }

            let mut op = op;
            if let Err(e) = self.apply_op(&op) {
                log::warn!(
                    "Rejected {} from client {client_id}: {e}",
                    op.kind_name()
                );
                outcome.rejected.push(Rejection {
                    client_op_id,
                    reason: e.to_string(),
                });
                continue;
            }

            op.set_seq(self.seq() + 1);
            let entry = SequencedOp {
                op,
                client_id: Some(client_id),
                client_op_id: Some(client_op_id),
            };
            self.journal.append(entry.clone());
            self.recent.insert(client_op_id);
            if self.journal.is_over_capacity() {
                self.journal.compact(&self.table, now);
            }
            outcome.accepted.push(entry);
        }

        log::debug!(
            "Client {client_id}: {} accepted, {} rejected, head seq {}",
            outcome.accepted.len(),
            outcome.rejected.len(),
            self.seq()
        );
        outcome
    }

    /// Record ephemeral state and build the relay for the other clients.
    pub fn handle_ephemeral(&mut self, client_id: ClientId, data: EphemeralData) -> ServerMessage {
        let state = self.ephemeral.entry(client_id).or_default();
        match &data {
            EphemeralData::Presence(presence) => state.presence = Some(presence.clone()),
            EphemeralData::Transform(preview) if preview.shapes.is_empty() => {
                state.transform = None
            }
            EphemeralData::Transform(preview) => state.transform = Some(preview.shapes.clone()),
        }
        ServerMessage::ServerEphemeral { client_id, data }
    }

    /// Take a checkpoint now. An empty journal only resets the timer.
    pub fn checkpoint(&mut self, now: Instant) -> bool {
        if self.journal.is_empty() {
            self.journal.skip_checkpoint(now);
            return false;
        }
        self.journal.compact(&self.table, now);
        true
    }

    /// Periodic tick. Takes a checkpoint when the interval has elapsed.
    pub fn on_timer(&mut self, now: Instant) -> bool {
        if self.journal.is_due(now, self.config.checkpoint_interval) {
            self.checkpoint(now)
        } else {
            false
        }
    }

    /// `Correction` carrying the current checkpoint and journal.
    pub fn correction(&self, reason: Option<String>) -> ServerMessage {
        ServerMessage::Correction {
            checkpoint: self.journal.checkpoint().clone(),
            ops: self.journal.entries().to_vec(),
            reason,
        }
    }

    /// First stable id of `client_id`'s block. The whole block must fit in
    /// the id space, so blocks never overlap.
    pub fn id_base(&self, client_id: ClientId) -> Result<ShapeId, AuthorityError> {
        let size = self.config.id_block_size;
        client_id
            .checked_add(1)
            .and_then(|end| end.checked_mul(size))
            .map(|end| end - size)
            .ok_or(AuthorityError::IdSpaceExhausted(client_id, size))
    }

    /// Most recently assigned sequence number.
    pub fn seq(&self) -> Seq {
        self.journal.head_seq()
    }

    pub fn table(&self) -> &ShapeTable {
        &self.table
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.connected.contains(&client_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }
}

impl Default for Authority {
    fn default() -> Self {
        Self::with_defaults()
    }
}
