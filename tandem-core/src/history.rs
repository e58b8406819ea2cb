//! Local undo/redo.
//!
//! History entries store the op batch the user committed (`intent`) and the
//! ops that take the document back (`restore_to`). `restore_to` is rebuilt
//! from the *current* document state on every undo and redo, so redo returns
//! to the state the user actually left, including remote edits that landed
//! in between.
//!
//! ```text
//!   commit ─► undo stack ──undo()──► redo stack
//!                 ▲                      │
//!                 └───────redo()─────────┘
//! ```
//!
//! Entries whose ops no longer make sense (an update to a shape someone else
//! deleted) are skipped rather than popped: they stay on the stack and may
//! become valid again if the shape comes back.

use std::collections::VecDeque;

use crate::op::Op;
use crate::table::ShapeLookup;

/// Default number of undoable batches kept.
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// An op tagged with its local ordering number.
///
/// `local_seq` orders local-origin ops before the authority assigns a real
/// sequence number; the op itself keeps `seq == UNASSIGNED_SEQ`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOp {
    pub local_seq: u64,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub intent: Vec<Op>,
    pub restore_to: Vec<Op>,
}

impl HistoryEntry {
    /// Entry for a freshly committed batch: inverses in reverse order.
    fn from_intent(intent: Vec<Op>) -> Self {
        let restore_to = intent.iter().rev().map(Op::invert).collect();
        Self { intent, restore_to }
    }

    fn is_valid(&self, doc: &impl ShapeLookup) -> bool {
        self.restore_to.iter().all(|op| is_op_valid(op, doc))
    }
}

/// Whether `op` can be meaningfully replayed against `doc`.
///
/// Create and delete are always considered valid; the authority decides.
/// Updates need their target to exist.
pub fn is_op_valid(op: &Op, doc: &impl ShapeLookup) -> bool {
    op.is_structural() || doc.contains(op.id())
}

#[derive(Debug, Clone)]
pub struct History {
    undo_stack: VecDeque<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
    pending: Vec<Op>,
    next_seq: u64,
    max_depth: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            pending: Vec::new(),
            next_seq: 1,
            max_depth: max_depth.max(1),
        }
    }

    /// Record an op into the current batch.
    pub fn push(&mut self, op: Op) {
        self.pending.push(op);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Close the current batch.
    ///
    /// Returns the batch with local sequence numbers assigned. An empty batch
    /// records nothing and leaves the redo stack alone.
    pub fn commit(&mut self) -> Vec<LocalOp> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let intent = std::mem::take(&mut self.pending);
        let batch = self.stamp(intent.iter().cloned());

        self.undo_stack.push_back(HistoryEntry::from_intent(intent));
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
        batch
    }

    /// Undo the most recent valid batch against `doc`.
    pub fn undo(&mut self, doc: &impl ShapeLookup) -> Option<Vec<LocalOp>> {
        let index = self.undo_stack.iter().rposition(|e| e.is_valid(doc))?;
        let entry = self.undo_stack.remove(index)?;

        let reverse = snapshot_restore(&entry.restore_to, doc);
        let ops = self.stamp(entry.restore_to.iter().cloned());
        self.redo_stack.push(HistoryEntry {
            intent: entry.restore_to,
            restore_to: reverse,
        });
        log::debug!("Undo: {} op(s)", ops.len());
        Some(ops)
    }

    /// Redo the most recently undone valid batch against `doc`.
    pub fn redo(&mut self, doc: &impl ShapeLookup) -> Option<Vec<LocalOp>> {
        let index = self.redo_stack.iter().rposition(|e| e.is_valid(doc))?;
        let entry = self.redo_stack.remove(index);

        let reverse = snapshot_restore(&entry.restore_to, doc);
        let ops = self.stamp(entry.restore_to.iter().cloned());
        self.undo_stack.push_back(HistoryEntry {
            intent: entry.restore_to,
            restore_to: reverse,
        });
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
        log::debug!("Redo: {} op(s)", ops.len());
        Some(ops)
    }

    pub fn can_undo(&self, doc: &impl ShapeLookup) -> bool {
        self.undo_stack.iter().any(|e| e.is_valid(doc))
    }

    pub fn can_redo(&self, doc: &impl ShapeLookup) -> bool {
        self.redo_stack.iter().any(|e| e.is_valid(doc))
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.pending.clear();
    }

    fn stamp(&mut self, ops: impl IntoIterator<Item = Op>) -> Vec<LocalOp> {
        ops.into_iter()
            .map(|op| {
                let local_seq = self.next_seq;
                self.next_seq += 1;
                LocalOp { local_seq, op }
            })
            .collect()
    }
}

/// Ops that bring `doc` back from the effect of `ops` to its current state.
///
/// Built from what the document holds *now*, not from the values recorded at
/// authoring time. Reversed so the batch unwinds last-in first-out.
fn snapshot_restore(ops: &[Op], doc: &impl ShapeLookup) -> Vec<Op> {
    ops.iter()
        .rev()
        .map(|op| match (op, doc.shape(op.id())) {
            (Op::DeleteShape { .. }, Some(current)) => Op::create(current.clone()),
            (_, Some(current)) => match op.property() {
                Some(property) => {
                    let now = current.get(property);
                    op.value()
                        .and_then(|target| Op::change(op.id(), target, now))
                        .unwrap_or_else(|| op.invert())
                }
                None => op.invert(),
            },
            (_, None) => op.invert(),
        })
        .collect()
}
