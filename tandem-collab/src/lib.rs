//! # tandem-collab: real-time sync for the Tandem shape editor
//!
//! A single authoritative server sequences every op; clients apply their own
//! edits optimistically and rebase when the server's order differs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ SyncClient  │ ◄─────────────────► │ SyncServer       │
//! │ (per user)  │     JSON text       │ (accept loop)    │
//! └──────┬──────┘                     └────────┬─────────┘
//!        │                                     │ Command (mpsc)
//!        ▼                                     ▼
//! ┌─────────────┐                     ┌──────────────────┐
//! │ Session     │                     │ Authority actor  │
//! │  Replica    │                     │  Journal         │
//! │  History    │                     │  ShapeTable      │
//! │  Presence   │                     └────────┬─────────┘
//! └─────────────┘                              │
//!                                      ┌───────┴────────┐
//!                                      │ BroadcastGroup │
//!                                      │ (outboxes)     │
//!                                      └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages
//! - [`journal`]: bounded op log with checkpoints
//! - [`authority`]: sequencing, validation, dedupe, corrections
//! - [`broadcast`]: per-client outboxes with eviction
//! - [`server`]: WebSocket server and authority actor
//! - [`replica`]: client-side confirmed/pending state and rebase
//! - [`presence`]: throttled cursors, selections and transform previews
//! - [`session`]: sans-IO client combining replica, history and presence
//! - [`client`]: WebSocket client driving a session

pub mod authority;
pub mod broadcast;
pub mod client;
pub mod journal;
pub mod presence;
pub mod protocol;
pub mod replica;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use authority::{Authority, AuthorityConfig, AuthorityError, BatchOutcome, Rejection};
pub use broadcast::{BroadcastGroup, BroadcastStats, Frame};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use journal::{Journal, JournalStats, CHECKPOINT_INTERVAL, MAX_JOURNAL_LENGTH};
pub use presence::{EphemeralThrottle, LocalPresence, PresenceRoom, RemotePeer, EPHEMERAL_INTERVAL};
pub use protocol::{
    ClientMessage, ClientOpId, EphemeralData, EphemeralSnapshot, LiveTransform, OutgoingOp,
    Presence, ProtocolError, SequencedOp, ServerMessage, TransformPreview,
};
pub use replica::{PendingOp, Replica};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{Session, SessionConfig, SessionError, SessionEvent};
