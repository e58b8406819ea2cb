//! Accepted-op journal with checkpoint compaction.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  Journal                     │
//! │                                              │
//! │  Checkpoint(seq) ◄── op ◄── op ◄── … ◄── op  │
//! │                                              │
//! │  compaction: snapshot table → new checkpoint │
//! │              and clear the entries           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Compaction triggers when the entry count exceeds the cap or when the
//! checkpoint interval elapses. Everything lives in memory for the lifetime
//! of the process.

use std::time::{Duration, Instant};

use tandem_core::{Checkpoint, Seq, ShapeTable};

use crate::protocol::SequencedOp;

/// Journal length that forces a checkpoint when exceeded.
pub const MAX_JOURNAL_LENGTH: usize = 500;

/// Time between periodic checkpoints.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalStats {
    /// Ops appended since the process started.
    pub total_appended: u64,
    /// Checkpoints taken since the process started.
    pub checkpoints: u64,
    /// Periodic checkpoints skipped because nothing changed.
    pub skipped_checkpoints: u64,
}

#[derive(Debug, Clone)]
pub struct Journal {
    checkpoint: Checkpoint,
    entries: Vec<SequencedOp>,
    max_len: usize,
    last_checkpoint_at: Instant,
    stats: JournalStats,
}

impl Journal {
    pub fn new(max_len: usize) -> Self {
        Self::from_checkpoint(Checkpoint::default(), max_len)
    }

    pub fn from_checkpoint(checkpoint: Checkpoint, max_len: usize) -> Self {
        Self {
            checkpoint,
            entries: Vec::new(),
            max_len: max_len.max(1),
            last_checkpoint_at: Instant::now(),
            stats: JournalStats::default(),
        }
    }

    /// Append an accepted op. Its seq must follow the journal head.
    pub fn append(&mut self, entry: SequencedOp) {
        debug_assert_eq!(entry.seq(), self.head_seq() + 1);
        self.entries.push(entry);
        self.stats.total_appended += 1;
    }

    /// Whether the entry count went past the cap.
    pub fn is_over_capacity(&self) -> bool {
        self.entries.len() > self.max_len
    }

    /// Whether the periodic checkpoint is due at `now`.
    pub fn is_due(&self, now: Instant, interval: Duration) -> bool {
        now.saturating_duration_since(self.last_checkpoint_at) >= interval
    }

    /// Fold the entries into a checkpoint of `table`, which must reflect
    /// every appended op.
    pub fn compact(&mut self, table: &ShapeTable, now: Instant) {
        let seq = self.head_seq();
        self.checkpoint = Checkpoint::capture(seq, table);
        let folded = self.entries.len();
        self.entries.clear();
        self.last_checkpoint_at = now;
        self.stats.checkpoints += 1;
        log::info!("Checkpoint at seq {seq} ({folded} ops folded, {} shapes)", table.len());
    }

    /// Reset the periodic timer without taking a checkpoint.
    pub fn skip_checkpoint(&mut self, now: Instant) {
        self.last_checkpoint_at = now;
        self.stats.skipped_checkpoints += 1;
    }

    /// Sequence number of the most recent accepted op.
    pub fn head_seq(&self) -> Seq {
        self.entries
            .last()
            .map(SequencedOp::seq)
            .unwrap_or(self.checkpoint.seq)
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn entries(&self) -> &[SequencedOp] {
        &self.entries
    }

    /// Entries with seq greater than `seq`.
    pub fn since(&self, seq: Seq) -> &[SequencedOp] {
        let start = self.entries.partition_point(|e| e.seq() <= seq);
        &self.entries[start..]
    }

    /// Rebuild state from the checkpoint and entries alone.
    pub fn replay(&self) -> ShapeTable {
        let mut table = self.checkpoint.restore();
        let skipped = table.apply_all(self.entries.iter().map(|e| &e.op));
        if skipped > 0 {
            log::warn!("Journal replay skipped {skipped} op(s)");
        }
        table
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn stats(&self) -> &JournalStats {
        &self.stats
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(MAX_JOURNAL_LENGTH)
    }
}
