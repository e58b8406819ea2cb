//! Client replication engine.
//!
//! The replica keeps three layers of state and can always rebuild the
//! document from them:
//!
//! ```text
//!   checkpoint ──► authoritative ops ──► pending local ops ──► Document
//!   (server)       (confirmed, in seq     (optimistic, in
//!                   order)                 submit order)
//! ```
//!
//! Local ops are applied to the document immediately and queued. Server
//! traffic extends the authoritative layer; whenever something arrives that
//! the optimistic state did not already predict, the document is rebuilt
//! from scratch ("rebase"). The document's editing overlay keeps in-progress
//! local edits on screen across rebuilds.
//!
//! The replica does no I/O. Callers feed it server messages and drain
//! outbound [`ClientMessage`]s from it.

use std::collections::{HashSet, VecDeque};

use tandem_core::{Checkpoint, ClientId, Document, LocalOp, Op, Seq, ShapeId, ShapeTable};
use uuid::Uuid;

use crate::journal::MAX_JOURNAL_LENGTH;
use crate::protocol::{ClientMessage, ClientOpId, OutgoingOp, SequencedOp};

/// A submitted op waiting for the authority's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOp {
    pub client_op_id: ClientOpId,
    pub local_seq: u64,
    pub op: Op,
}

#[derive(Debug)]
pub struct Replica {
    client_id: Option<ClientId>,
    id_base: ShapeId,
    next_local_id: u64,
    confirmed_seq: Seq,
    checkpoint: Checkpoint,
    authoritative: Vec<SequencedOp>,
    pending: VecDeque<PendingOp>,
    sent: HashSet<ClientOpId>,
    document: Document,
    connected: bool,
    max_authoritative: usize,
}

impl Default for Replica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica {
    pub fn new() -> Self {
        Self::with_compaction(MAX_JOURNAL_LENGTH)
    }

    /// Replica that folds its authoritative log into a local checkpoint once
    /// it grows past `max_authoritative` entries.
    pub fn with_compaction(max_authoritative: usize) -> Self {
        Self {
            client_id: None,
            id_base: 0,
            next_local_id: 1,
            confirmed_seq: 0,
            checkpoint: Checkpoint::default(),
            authoritative: Vec::new(),
            pending: VecDeque::new(),
            sent: HashSet::new(),
            document: Document::new(),
            connected: false,
            max_authoritative: max_authoritative.max(1),
        }
    }

    /// Apply a committed local op optimistically and queue it for sending.
    ///
    /// Returns the op's client id, or `None` if it could not be applied
    /// locally and was dropped.
    pub fn submit(&mut self, local: LocalOp) -> Option<ClientOpId> {
        if let Err(e) = self.document.apply(&local.op) {
            log::debug!("Dropping local {}: {e}", local.op.kind_name());
            return None;
        }
        let client_op_id = Uuid::new_v4();
        self.pending.push_back(PendingOp {
            client_op_id,
            local_seq: local.local_seq,
            op: local.op,
        });
        Some(client_op_id)
    }

    /// Next batch to transmit: every pending op not already in flight.
    pub fn take_outbound(&mut self) -> Option<ClientMessage> {
        let client_id = match (self.connected, self.client_id) {
            (true, Some(id)) => id,
            _ => return None,
        };
        let ops: Vec<OutgoingOp> = self
            .pending
            .iter()
            .filter(|p| !self.sent.contains(&p.client_op_id))
            .map(|p| OutgoingOp {
                client_op_id: p.client_op_id,
                op: p.op.clone(),
            })
            .collect();
        if ops.is_empty() {
            return None;
        }
        self.sent.extend(ops.iter().map(|o| o.client_op_id));
        Some(ClientMessage::ClientOps {
            client_id,
            base_seq: self.confirmed_seq,
            ops,
        })
    }

    /// `Hello` identifying the previous session, if any.
    pub fn hello(&self) -> ClientMessage {
        ClientMessage::Hello {
            client_id: self.client_id,
            last_seq: self.client_id.map(|_| self.confirmed_seq),
        }
    }

    pub fn on_welcome(
        &mut self,
        client_id: ClientId,
        id_base: ShapeId,
        checkpoint: Checkpoint,
        ops: Vec<SequencedOp>,
    ) {
        if id_base != self.id_base {
            self.next_local_id = 1;
        }
        self.client_id = Some(client_id);
        self.id_base = id_base;
        self.connected = true;
        self.replace_authoritative(checkpoint, ops);
        log::info!(
            "Welcomed as client {client_id} at seq {} ({} pending)",
            self.confirmed_seq,
            self.pending.len()
        );
        self.rebase();
    }

    /// Fold accepted ops into the authoritative log.
    ///
    /// Returns how many ops came from somewhere other than our own pending
    /// queue (and therefore forced a rebase).
    pub fn on_server_ops(&mut self, ops: Vec<SequencedOp>) -> usize {
        let mut foreign = 0;
        for entry in ops {
            let seq = entry.seq();
            if seq <= self.confirmed_seq {
                log::trace!("Ignoring duplicate op at seq {seq}");
                continue;
            }
            if seq != self.confirmed_seq + 1 {
                log::warn!("Sequence gap: expected {}, got {seq}", self.confirmed_seq + 1);
            }
            self.confirmed_seq = seq;

            let own = entry
                .client_op_id
                .is_some_and(|id| self.confirm_pending(&id));
            if !own {
                foreign += 1;
            }
            self.authoritative.push(entry);
        }

        if foreign > 0 {
            self.rebase();
        }
        self.compact_if_needed();
        foreign
    }

    /// The authority refused one of our ops.
    pub fn on_reject(&mut self, client_op_id: ClientOpId, reason: &str) {
        if self.confirm_pending(&client_op_id) {
            log::warn!("Op {client_op_id} rejected: {reason}");
            self.rebase();
        } else {
            log::debug!("Reject for unknown op {client_op_id}: {reason}");
        }
    }

    /// Our base was older than the authority's checkpoint: start over from
    /// the state it sent and resend everything still pending.
    pub fn on_correction(&mut self, checkpoint: Checkpoint, ops: Vec<SequencedOp>) {
        self.replace_authoritative(checkpoint, ops);
        log::warn!(
            "Correction: rebased onto seq {}, resending {} op(s)",
            self.confirmed_seq,
            self.pending.len()
        );
        self.rebase();
    }

    /// The transport dropped. In-flight ops will be resent on reconnect.
    pub fn on_disconnected(&mut self) {
        self.connected = false;
        self.sent.clear();
    }

    /// Rebuild the document from checkpoint, authoritative and pending ops.
    pub fn rebase(&mut self) {
        let fresh = self.rebuilt_table();
        self.document.rebuild(fresh);
        log::debug!(
            "Rebased at seq {} with {} pending op(s)",
            self.confirmed_seq,
            self.pending.len()
        );
    }

    /// Table the document would hold after a rebase.
    pub fn rebuilt_table(&self) -> ShapeTable {
        let mut table = self.checkpoint.restore();
        table.apply_all(self.authoritative.iter().map(|e| &e.op));
        let dropped = table.apply_all(self.pending.iter().map(|p| &p.op));
        if dropped > 0 {
            log::debug!("{dropped} pending op(s) no longer apply");
        }
        table
    }

    /// Next stable id from this client's block, once welcomed.
    pub fn allocate_id(&mut self) -> Option<ShapeId> {
        self.client_id?;
        let id = self.id_base.checked_add(self.next_local_id)?;
        self.next_local_id += 1;
        Some(id)
    }

    fn replace_authoritative(&mut self, checkpoint: Checkpoint, ops: Vec<SequencedOp>) {
        let known: HashSet<ClientOpId> = ops.iter().filter_map(|e| e.client_op_id).collect();
        self.pending.retain(|p| !known.contains(&p.client_op_id));
        self.sent.clear();

        self.confirmed_seq = ops.last().map(SequencedOp::seq).unwrap_or(checkpoint.seq);
        self.checkpoint = checkpoint;
        self.authoritative = ops;
        self.compact_if_needed();
    }

    fn confirm_pending(&mut self, client_op_id: &ClientOpId) -> bool {
        self.sent.remove(client_op_id);
        match self.pending.iter().position(|p| p.client_op_id == *client_op_id) {
            Some(index) => {
                self.pending.remove(index);
                true
            }
            None => false,
        }
    }

    fn compact_if_needed(&mut self) {
        if self.authoritative.len() <= self.max_authoritative {
            return;
        }
        let mut table = self.checkpoint.restore();
        table.apply_all(self.authoritative.iter().map(|e| &e.op));
        self.checkpoint = Checkpoint::capture(self.confirmed_seq, &table);
        log::debug!(
            "Folded {} authoritative op(s) into local checkpoint {}",
            self.authoritative.len(),
            self.confirmed_seq
        );
        self.authoritative.clear();
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn id_base(&self) -> ShapeId {
        self.id_base
    }

    pub fn confirmed_seq(&self) -> Seq {
        self.confirmed_seq
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn authoritative(&self) -> &[SequencedOp] {
        &self.authoritative
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingOp> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.sent.len()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}
