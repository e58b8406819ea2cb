//! Ephemeral channel: cursors, selections and live transform previews.
//!
//! ```text
//! local cursor / drag
//!       │
//!       ▼
//! LocalPresence ── EphemeralThrottle (33 ms, trailing) ──► ClientEphemeral
//!                                                              │ relay
//!                                                              ▼
//! PresenceRoom ◄── ServerEphemeral / UserLeft / Welcome snapshot
//! ```
//!
//! Nothing here is journaled. Presence and transform previews are throttled
//! independently so a burst of cursor moves never starves a drag preview.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tandem_core::{ClientId, ShapeId, Vec2};

use crate::protocol::{EphemeralData, EphemeralSnapshot, LiveTransform, Presence, TransformPreview};

/// Minimum spacing between two ephemeral messages of the same kind.
pub const EPHEMERAL_INTERVAL: Duration = Duration::from_millis(33);

// ───────────────────────────────────────────────────────────────────
// Send-side throttle
// ───────────────────────────────────────────────────────────────────

/// Leading-edge throttle with a trailing send.
///
/// The first value in a window goes out immediately. Later values in the
/// same window overwrite each other and the last one is released by
/// [`poll_trailing`](Self::poll_trailing) once the window closes.
#[derive(Debug, Clone)]
pub struct EphemeralThrottle<T> {
    interval: Duration,
    last_sent: Option<Instant>,
    trailing: Option<T>,
}

impl<T> EphemeralThrottle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            trailing: None,
        }
    }

    fn window_open(&self, now: Instant) -> bool {
        self.last_sent
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Offer a value. Returns it if it may be sent right away.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        if self.window_open(now) {
            self.last_sent = Some(now);
            self.trailing = None;
            Some(value)
        } else {
            self.trailing = Some(value);
            None
        }
    }

    /// Release the coalesced value once its window has closed.
    pub fn poll_trailing(&mut self, now: Instant) -> Option<T> {
        if self.trailing.is_some() && self.window_open(now) {
            self.last_sent = Some(now);
            self.trailing.take()
        } else {
            None
        }
    }

    /// When the trailing value becomes sendable, if one is waiting.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (&self.trailing, self.last_sent) {
            (Some(_), Some(last)) => Some(last + self.interval),
            (Some(_), None) => Some(Instant::now()),
            _ => None,
        }
    }

    pub fn has_trailing(&self) -> bool {
        self.trailing.is_some()
    }

    /// Drop any coalesced value (e.g. the connection went away).
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.trailing = None;
    }
}

// ───────────────────────────────────────────────────────────────────
// Local state
// ───────────────────────────────────────────────────────────────────

/// This client's cursor, selection and outgoing preview, with one throttle
/// per message kind.
#[derive(Debug, Clone)]
pub struct LocalPresence {
    presence: Presence,
    presence_throttle: EphemeralThrottle<Presence>,
    transform_throttle: EphemeralThrottle<TransformPreview>,
}

impl LocalPresence {
    pub fn new(interval: Duration) -> Self {
        Self {
            presence: Presence::default(),
            presence_throttle: EphemeralThrottle::new(interval),
            transform_throttle: EphemeralThrottle::new(interval),
        }
    }

    pub fn update_cursor(&mut self, cursor: Option<Vec2>, now: Instant) -> Option<EphemeralData> {
        self.presence.cursor = cursor;
        self.offer_presence(now)
    }

    pub fn update_selection(
        &mut self,
        selection: Vec<ShapeId>,
        now: Instant,
    ) -> Option<EphemeralData> {
        self.presence.selection = selection;
        self.offer_presence(now)
    }

    fn offer_presence(&mut self, now: Instant) -> Option<EphemeralData> {
        self.presence_throttle
            .offer(self.presence.clone(), now)
            .map(EphemeralData::Presence)
    }

    /// Offer a live transform preview. An empty list ends the preview.
    pub fn preview(&mut self, shapes: Vec<LiveTransform>, now: Instant) -> Option<EphemeralData> {
        self.transform_throttle
            .offer(TransformPreview { shapes }, now)
            .map(EphemeralData::Transform)
    }

    /// Trailing messages whose window has closed.
    pub fn poll(&mut self, now: Instant) -> Vec<EphemeralData> {
        let mut out = Vec::new();
        if let Some(presence) = self.presence_throttle.poll_trailing(now) {
            out.push(EphemeralData::Presence(presence));
        }
        if let Some(preview) = self.transform_throttle.poll_trailing(now) {
            out.push(EphemeralData::Transform(preview));
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.presence_throttle.next_deadline(),
            self.transform_throttle.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    pub fn reset(&mut self) {
        self.presence_throttle.reset();
        self.transform_throttle.reset();
    }
}

impl Default for LocalPresence {
    fn default() -> Self {
        Self::new(EPHEMERAL_INTERVAL)
    }
}

// ───────────────────────────────────────────────────────────────────
// Remote peers
// ───────────────────────────────────────────────────────────────────

/// What we last heard from one remote client.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePeer {
    pub client_id: ClientId,
    pub cursor: Option<Vec2>,
    pub selection: Vec<ShapeId>,
    /// Shapes this peer is currently dragging, with their live transforms.
    pub transform: Vec<LiveTransform>,
}

impl RemotePeer {
    fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            cursor: None,
            selection: Vec::new(),
            transform: Vec::new(),
        }
    }

    pub fn is_transforming(&self, id: ShapeId) -> bool {
        self.transform.iter().any(|t| t.id == id)
    }
}

/// Remote presence state for every other client in the session.
#[derive(Debug, Clone, Default)]
pub struct PresenceRoom {
    local_client: Option<ClientId>,
    peers: BTreeMap<ClientId, RemotePeer>,
}

impl PresenceRoom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with the snapshot from a `Welcome`.
    pub fn seed(&mut self, local_client: ClientId, snapshot: Vec<EphemeralSnapshot>) {
        self.local_client = Some(local_client);
        self.peers.clear();
        for entry in snapshot {
            if entry.client_id == local_client {
                continue;
            }
            let mut peer = RemotePeer::new(entry.client_id);
            if let Some(presence) = entry.presence {
                peer.cursor = presence.cursor;
                peer.selection = presence.selection;
            }
            peer.transform = entry.transform.unwrap_or_default();
            self.peers.insert(entry.client_id, peer);
        }
    }

    /// Apply a relayed ephemeral message. Our own echoes are ignored.
    pub fn handle(&mut self, client_id: ClientId, data: &EphemeralData) -> Option<&RemotePeer> {
        if Some(client_id) == self.local_client {
            return None;
        }
        let peer = self
            .peers
            .entry(client_id)
            .or_insert_with(|| RemotePeer::new(client_id));
        match data {
            EphemeralData::Presence(presence) => {
                peer.cursor = presence.cursor;
                peer.selection = presence.selection.clone();
            }
            EphemeralData::Transform(preview) => peer.transform = preview.shapes.clone(),
        }
        Some(peer)
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<RemotePeer> {
        self.peers.remove(&client_id)
    }

    pub fn peer(&self, client_id: ClientId) -> Option<&RemotePeer> {
        self.peers.get(&client_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.values()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Remote clients currently previewing a transform of `id`.
    pub fn transforming(&self, id: ShapeId) -> impl Iterator<Item = ClientId> + '_ {
        self.peers
            .values()
            .filter(move |p| p.is_transforming(id))
            .map(|p| p.client_id)
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}
