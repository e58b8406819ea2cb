//! Client session: the sans-IO state machine a UI drives.
//!
//! A `Session` ties together the replica, local undo history, the editing
//! overlay and presence. The UI calls intent methods (`create_shape`,
//! `move_shape`, `begin_edit`, `undo`, ...) and renders
//! [`Session::document`]; the transport feeds it server messages and sends
//! whatever [`Session::take_outbound`] returns.
//!
//! ```text
//!   intent ─► History.commit ─► Replica.submit ─► outbound ClientOps
//!   ServerMessage ─► Replica / PresenceRoom ─► Document (live + durable)
//! ```

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tandem_core::{
    ClientId, Color, Document, Editor, History, LocalOp, Op, Property, PropertyValue, Shape,
    ShapeId, ShapeKind, ShapeLookup, Vec2, DEFAULT_HISTORY_DEPTH,
};
use thiserror::Error;

use crate::journal::MAX_JOURNAL_LENGTH;
use crate::presence::{LocalPresence, PresenceRoom, EPHEMERAL_INTERVAL};
use crate::protocol::{ClientMessage, ClientOpId, EphemeralData, LiveTransform, ServerMessage};
use crate::replica::Replica;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Undoable batches kept
    pub history_depth: usize,
    /// Ephemeral throttle window
    pub ephemeral_interval: Duration,
    /// Authoritative ops kept before folding into a local checkpoint
    pub max_authoritative: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            ephemeral_interval: EPHEMERAL_INTERVAL,
            max_authoritative: MAX_JOURNAL_LENGTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("not welcomed by the server yet")]
    NotWelcomed,
    #[error("shape {0} does not exist")]
    UnknownShape(ShapeId),
    #[error("shape {0} is not being edited")]
    NotEditing(ShapeId),
}

/// What a server message changed, for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Welcomed { client_id: ClientId },
    /// Authoritative ops arrived; `foreign` of them came from elsewhere.
    OpsApplied { foreign: usize },
    Rejected { client_op_id: ClientOpId, reason: String },
    Corrected,
    PeerUpdated { client_id: ClientId },
    PeerLeft { client_id: ClientId },
}

pub struct Session {
    replica: Replica,
    history: History,
    local: LocalPresence,
    room: PresenceRoom,
    ephemeral_out: VecDeque<EphemeralData>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            replica: Replica::with_compaction(config.max_authoritative),
            history: History::new(config.history_depth),
            local: LocalPresence::new(config.ephemeral_interval),
            room: PresenceRoom::new(),
            ephemeral_out: VecDeque::new(),
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Shape intents
    // ───────────────────────────────────────────────────────────────

    /// Create a shape with an id from this client's block.
    pub fn create_shape(
        &mut self,
        kind: ShapeKind,
        position: Vec2,
        color: Color,
    ) -> Result<ShapeId, SessionError> {
        let id = self.replica.allocate_id().ok_or(SessionError::NotWelcomed)?;
        self.record(vec![Op::create(Shape::new(id, kind, position, color))]);
        Ok(id)
    }

    pub fn move_shape(&mut self, id: ShapeId, to: Vec2) -> Result<(), SessionError> {
        self.change(id, PropertyValue::Position(to))
    }

    pub fn rotate_shape(&mut self, id: ShapeId, angle: f64) -> Result<(), SessionError> {
        self.change(id, PropertyValue::Rotation(angle))
    }

    pub fn scale_shape(&mut self, id: ShapeId, scale: Vec2) -> Result<(), SessionError> {
        self.change(id, PropertyValue::Scale(scale))
    }

    pub fn recolor_shape(&mut self, id: ShapeId, color: Color) -> Result<(), SessionError> {
        self.change(id, PropertyValue::Color(color))
    }

    pub fn delete_shape(&mut self, id: ShapeId) -> Result<(), SessionError> {
        let shape = self
            .replica
            .document()
            .durable_shape(id)
            .ok_or(SessionError::UnknownShape(id))?;
        self.record(vec![Op::delete(shape)]);
        Ok(())
    }

    /// Immediate single-property change. No-op when the value is unchanged.
    fn change(&mut self, id: ShapeId, value: PropertyValue) -> Result<(), SessionError> {
        let prev = self
            .replica
            .document()
            .durable_value(id, value.property())
            .ok_or(SessionError::UnknownShape(id))?;
        if let Some(op) = Op::change(id, prev, value).filter(|_| prev != value) {
            self.record(vec![op]);
        }
        Ok(())
    }

    /// Commit a batch to history and hand it to the replica.
    fn record(&mut self, ops: Vec<Op>) {
        if ops.is_empty() {
            return;
        }
        for op in ops {
            self.history.push(op);
        }
        let batch = self.history.commit();
        self.submit(batch);
    }

    fn submit(&mut self, batch: Vec<LocalOp>) {
        for local in batch {
            self.replica.submit(local);
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Continuous edits (drag, rotate handle, color picker)
    // ───────────────────────────────────────────────────────────────

    /// Start a local edit: remote updates to these properties now only
    /// touch the durable value.
    pub fn begin_edit(&mut self, id: ShapeId, properties: &[Property]) -> Result<(), SessionError> {
        self.replica
            .document_mut()
            .start_editing(id, properties, Editor::Local)
            .map_err(|_| SessionError::UnknownShape(id))
    }

    /// Update the live value of a property under edit.
    pub fn set_live(
        &mut self,
        id: ShapeId,
        value: PropertyValue,
        now: Instant,
    ) -> Result<(), SessionError> {
        let document = self.replica.document_mut();
        if !document.overlay().is_shadowed(id, value.property()) {
            return Err(SessionError::NotEditing(id));
        }
        document
            .set_live(id, value)
            .map_err(|_| SessionError::UnknownShape(id))?;

        let preview = self.local_preview();
        if let Some(data) = self.local.preview(preview, now) {
            self.ephemeral_out.push_back(data);
        }
        Ok(())
    }

    /// Finish an edit, emitting one op per property that changed.
    ///
    /// Returns how many ops were recorded.
    pub fn commit_edit(
        &mut self,
        id: ShapeId,
        properties: &[Property],
        now: Instant,
    ) -> Result<usize, SessionError> {
        if !self.is_editing(id) {
            return Err(SessionError::NotEditing(id));
        }
        let ops = self.replica.document_mut().commit_editing(id, properties);
        let count = ops.len();
        self.record(ops);
        self.end_preview_if_idle(now);
        Ok(count)
    }

    /// Abandon an edit and restore the durable values.
    pub fn cancel_edit(
        &mut self,
        id: ShapeId,
        properties: &[Property],
        now: Instant,
    ) -> Result<(), SessionError> {
        if !self.is_editing(id) {
            return Err(SessionError::NotEditing(id));
        }
        self.replica.document_mut().cancel_editing(id, properties);
        self.end_preview_if_idle(now);
        Ok(())
    }

    pub fn is_editing(&self, id: ShapeId) -> bool {
        self.replica
            .document()
            .overlay()
            .is_edited_by(id, Editor::Local)
    }

    fn local_preview(&self) -> Vec<LiveTransform> {
        let document = self.replica.document();
        document
            .overlay()
            .shadowed_shapes()
            .into_iter()
            .filter_map(|id| document.shape(id).map(LiveTransform::of))
            .collect()
    }

    fn end_preview_if_idle(&mut self, now: Instant) {
        if self.local_preview().is_empty() {
            if let Some(data) = self.local.preview(Vec::new(), now) {
                self.ephemeral_out.push_back(data);
            }
        }
    }

    // ───────────────────────────────────────────────────────────────
    // Undo / redo
    // ───────────────────────────────────────────────────────────────

    /// Undo the most recent valid batch. Returns `false` if there was none.
    pub fn undo(&mut self) -> bool {
        match self.history.undo(self.replica.document()) {
            Some(batch) => {
                self.submit(batch);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        match self.history.redo(self.replica.document()) {
            Some(batch) => {
                self.submit(batch);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo(self.replica.document())
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo(self.replica.document())
    }

    // ───────────────────────────────────────────────────────────────
    // Network
    // ───────────────────────────────────────────────────────────────

    /// First message to send after (re)connecting.
    pub fn hello(&self) -> ClientMessage {
        self.replica.hello()
    }

    pub fn handle_server_message(&mut self, msg: ServerMessage) -> SessionEvent {
        match msg {
            ServerMessage::Welcome {
                client_id,
                id_base,
                checkpoint,
                ops,
                ephemeral,
            } => {
                self.replica.on_welcome(client_id, id_base, checkpoint, ops);
                self.room.seed(client_id, ephemeral);
                self.relink_remote_editors();
                SessionEvent::Welcomed { client_id }
            }
            ServerMessage::ServerOps { ops } => {
                let foreign = self.replica.on_server_ops(ops);
                SessionEvent::OpsApplied { foreign }
            }
            ServerMessage::Reject {
                client_op_id,
                reason,
            } => {
                self.replica.on_reject(client_op_id, &reason);
                SessionEvent::Rejected {
                    client_op_id,
                    reason,
                }
            }
            ServerMessage::Correction {
                checkpoint,
                ops,
                reason,
            } => {
                if let Some(reason) = reason {
                    log::warn!("Server correction: {reason}");
                }
                self.replica.on_correction(checkpoint, ops);
                SessionEvent::Corrected
            }
            ServerMessage::ServerEphemeral { client_id, data } => {
                if self.room.handle(client_id, &data).is_some() {
                    if let EphemeralData::Transform(preview) = &data {
                        let editor = Editor::Remote(client_id);
                        let document = self.replica.document_mut();
                        document.unlink_editor_everywhere(editor);
                        for live in &preview.shapes {
                            document.link_editor(live.id, editor);
                        }
                    }
                }
                SessionEvent::PeerUpdated { client_id }
            }
            ServerMessage::UserLeft { client_id } => {
                self.room.remove(client_id);
                self.replica
                    .document_mut()
                    .unlink_editor_everywhere(Editor::Remote(client_id));
                SessionEvent::PeerLeft { client_id }
            }
        }
    }

    fn relink_remote_editors(&mut self) {
        let document = self.replica.document_mut();
        for peer in self.room.peers() {
            let editor = Editor::Remote(peer.client_id);
            document.unlink_editor_everywhere(editor);
            for live in &peer.transform {
                document.link_editor(live.id, editor);
            }
        }
    }

    /// The transport dropped; keep pending ops for the next `Welcome`.
    pub fn on_disconnected(&mut self) {
        self.replica.on_disconnected();
        let document = self.replica.document_mut();
        for peer in self.room.peers() {
            document.unlink_editor_everywhere(Editor::Remote(peer.client_id));
        }
        self.room.clear();
        self.local.reset();
        self.ephemeral_out.clear();
    }

    /// Messages ready to send: pending ops first, then ephemeral updates.
    pub fn take_outbound(&mut self) -> Vec<ClientMessage> {
        let mut out: Vec<ClientMessage> = self.replica.take_outbound().into_iter().collect();
        match self.replica.client_id().filter(|_| self.replica.is_connected()) {
            Some(client_id) => out.extend(
                self.ephemeral_out
                    .drain(..)
                    .map(|data| ClientMessage::ClientEphemeral { client_id, data }),
            ),
            None => self.ephemeral_out.clear(),
        }
        out
    }

    // ───────────────────────────────────────────────────────────────
    // Presence
    // ───────────────────────────────────────────────────────────────

    pub fn update_cursor(&mut self, cursor: Option<Vec2>, now: Instant) {
        if let Some(data) = self.local.update_cursor(cursor, now) {
            self.ephemeral_out.push_back(data);
        }
    }

    pub fn update_selection(&mut self, selection: Vec<ShapeId>, now: Instant) {
        if let Some(data) = self.local.update_selection(selection, now) {
            self.ephemeral_out.push_back(data);
        }
    }

    /// Release trailing ephemeral updates whose throttle window closed.
    pub fn poll_ephemeral(&mut self, now: Instant) {
        self.ephemeral_out.extend(self.local.poll(now));
    }

    /// When `poll_ephemeral` next has something to release.
    pub fn next_ephemeral_deadline(&self) -> Option<Instant> {
        self.local.next_deadline()
    }

    // ───────────────────────────────────────────────────────────────
    // Accessors
    // ───────────────────────────────────────────────────────────────

    pub fn document(&self) -> &Document {
        self.replica.document()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn room(&self) -> &PresenceRoom {
        &self.room
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.replica.client_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::Authority;
    use tandem_core::Checkpoint;

    /// In-process authority routing messages between sessions.
    struct Hub {
        authority: Authority,
        clients: Vec<(ClientId, Session)>,
    }

    impl Hub {
        fn new(count: usize) -> Self {
            let mut hub = Hub {
                authority: Authority::default(),
                clients: Vec::new(),
            };
            for _ in 0..count {
                let mut session = Session::default();
                let (client_id, welcome) = hub.authority.connect(None).unwrap();
                session.handle_server_message(welcome);
                hub.clients.push((client_id, session));
            }
            hub
        }

        fn session(&mut self, index: usize) -> &mut Session {
            &mut self.clients[index].1
        }

        /// Deliver every queued message from client `index` and the results.
        fn flush(&mut self, index: usize) {
            let from = self.clients[index].0;
            let outbound = self.clients[index].1.take_outbound();
            for msg in outbound {
                match msg {
                    ClientMessage::ClientOps { base_seq, ops, .. } => {
                        let outcome =
                            self.authority
                                .handle_client_ops(from, base_seq, ops, Instant::now());
                        for reply in outcome.replies() {
                            self.clients[index].1.handle_server_message(reply);
                        }
                        if let Some(ops) = outcome.broadcast() {
                            for (_, session) in &mut self.clients {
                                session.handle_server_message(ops.clone());
                            }
                        }
                    }
                    ClientMessage::ClientEphemeral { data, .. } => {
                        let relay = self.authority.handle_ephemeral(from, data);
                        for (id, session) in &mut self.clients {
                            if *id != from {
                                session.handle_server_message(relay.clone());
                            }
                        }
                    }
                    ClientMessage::Hello { .. } => {}
                }
            }
        }
    }

    fn position(session: &Session, id: ShapeId) -> Vec2 {
        session.document().shape(id).unwrap().position()
    }

    #[test]
    fn test_create_before_welcome_fails() {
        let mut session = Session::default();
        assert_eq!(
            session.create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK),
            Err(SessionError::NotWelcomed)
        );
    }

    #[test]
    fn test_intents_on_unknown_shape() {
        let mut hub = Hub::new(1);
        let session = hub.session(0);
        assert_eq!(session.move_shape(5, Vec2::ONE), Err(SessionError::UnknownShape(5)));
        assert_eq!(session.delete_shape(5), Err(SessionError::UnknownShape(5)));
        assert_eq!(
            session.set_live(5, PropertyValue::Rotation(1.0), Instant::now()),
            Err(SessionError::NotEditing(5))
        );
    }

    #[test]
    fn test_end_to_end_drag_under_remote_update() {
        let mut hub = Hub::new(2);

        let id = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::new(100.0, 100.0), Color(0xFF0000))
            .unwrap();
        assert_eq!(id, 1_000_001);
        hub.flush(0);
        assert_eq!(position(hub.session(1), id), Vec2::new(100.0, 100.0));

        // Client A starts dragging.
        let t0 = Instant::now();
        let a = hub.session(0);
        a.begin_edit(id, &[Property::Position]).unwrap();
        a.set_live(id, PropertyValue::Position(Vec2::new(150.0, 150.0)), t0)
            .unwrap();

        // Client B moves the same shape and it is sequenced first.
        hub.session(1).move_shape(id, Vec2::new(500.0, 600.0)).unwrap();
        hub.flush(1);

        // A keeps its live value; the durable value follows the server.
        let a = hub.session(0);
        assert_eq!(position(a, id), Vec2::new(150.0, 150.0));
        assert_eq!(
            a.document().durable_value(id, Property::Position),
            Some(PropertyValue::Position(Vec2::new(500.0, 600.0)))
        );

        // Commit uses the durable value at commit time as prev.
        assert_eq!(a.commit_edit(id, &[Property::Position], t0).unwrap(), 1);
        let pending: Vec<Op> = a.replica().pending().map(|p| p.op.clone()).collect();
        assert_eq!(
            pending,
            vec![Op::UpdatePosition {
                id,
                seq: 0,
                x: 150.0,
                y: 150.0,
                prev_x: 500.0,
                prev_y: 600.0,
            }]
        );
        hub.flush(0);

        for i in 0..2 {
            assert_eq!(position(hub.session(i), id), Vec2::new(150.0, 150.0));
        }
        assert_eq!(hub.authority.seq(), 3);
        assert_eq!(
            hub.authority.table().get(id).unwrap().position(),
            Vec2::new(150.0, 150.0)
        );
    }

    #[test]
    fn test_cancel_edit_shows_remote_value() {
        let mut hub = Hub::new(2);
        let id = hub
            .session(0)
            .create_shape(ShapeKind::Ellipse, Vec2::new(100.0, 200.0), Color::BLACK)
            .unwrap();
        hub.flush(0);

        let t0 = Instant::now();
        hub.session(0).begin_edit(id, &[Property::Position]).unwrap();
        hub.session(0)
            .set_live(id, PropertyValue::Position(Vec2::new(150.0, 250.0)), t0)
            .unwrap();
        hub.session(1).move_shape(id, Vec2::new(500.0, 600.0)).unwrap();
        hub.flush(1);

        hub.session(0)
            .cancel_edit(id, &[Property::Position], t0)
            .unwrap();
        assert_eq!(position(hub.session(0), id), Vec2::new(500.0, 600.0));
        assert!(!hub.session(0).is_editing(id));
    }

    #[test]
    fn test_undo_redo_through_authority() {
        let mut hub = Hub::new(2);
        let id = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        hub.session(0).rotate_shape(id, 45.0).unwrap();
        hub.flush(0);

        // Remote recolor interleaves; undo only reverts our rotation.
        hub.session(1).recolor_shape(id, Color(0x00FF00)).unwrap();
        hub.flush(1);

        assert!(hub.session(0).undo());
        hub.flush(0);
        let shape = hub.authority.table().get(id).unwrap().clone();
        assert_eq!(shape.rotation, 0.0);
        assert_eq!(shape.color, Color(0x00FF00));

        assert!(hub.session(0).redo());
        hub.flush(0);
        assert_eq!(hub.authority.table().get(id).unwrap().rotation, 45.0);
        assert_eq!(hub.session(1).document().shape(id).unwrap().rotation, 45.0);
    }

    #[test]
    fn test_redo_after_unrelated_remote_ops() {
        let mut hub = Hub::new(2);
        let id = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        hub.flush(0);
        assert_eq!(hub.session(0).document().shape(id).unwrap().scale(), Vec2::ONE);

        hub.session(0).scale_shape(id, Vec2::new(2.0, 2.0)).unwrap();
        hub.flush(0);
        assert!(hub.session(0).undo());
        hub.flush(0);
        assert_eq!(hub.authority.table().get(id).unwrap().scale(), Vec2::ONE);

        // Another client works on its own shape between undo and redo.
        let other = hub
            .session(1)
            .create_shape(ShapeKind::Ellipse, Vec2::new(10.0, 10.0), Color(0x0000FF))
            .unwrap();
        hub.session(1).move_shape(other, Vec2::new(40.0, 50.0)).unwrap();
        hub.flush(1);

        assert!(hub.session(0).redo());
        hub.flush(0);

        let doubled = Vec2::new(2.0, 2.0);
        assert_eq!(hub.authority.table().get(id).unwrap().scale(), doubled);
        for i in 0..2 {
            let session = hub.session(i);
            assert_eq!(session.document().shape(id).unwrap().scale(), doubled);
            let untouched = session.document().shape(other).unwrap();
            assert_eq!(untouched.position(), Vec2::new(40.0, 50.0));
            assert_eq!(untouched.scale(), Vec2::ONE);
            assert_eq!(untouched.color, Color(0x0000FF));
        }
        assert!(!hub.session(0).can_redo());
    }

    #[test]
    fn test_undo_skips_entry_for_remotely_deleted_shape() {
        let mut hub = Hub::new(2);
        let first = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        let second = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ONE, Color::BLACK)
            .unwrap();
        hub.flush(0);
        hub.session(0).move_shape(first, Vec2::new(5.0, 5.0)).unwrap();
        hub.session(0).move_shape(second, Vec2::new(9.0, 9.0)).unwrap();
        hub.flush(0);

        hub.session(1).delete_shape(second).unwrap();
        hub.flush(1);

        // The move of `second` is invalid now; undo reaches past it.
        assert!(hub.session(0).undo());
        hub.flush(0);
        assert_eq!(
            hub.authority.table().get(first).unwrap().position(),
            Vec2::ZERO
        );
    }

    #[test]
    fn test_rejected_op_rolls_back() {
        let mut hub = Hub::new(2);
        let id = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        hub.flush(0);

        // B deletes, A moves concurrently; A's move arrives second.
        hub.session(1).delete_shape(id).unwrap();
        hub.session(0).move_shape(id, Vec2::ONE).unwrap();
        hub.flush(1);
        hub.flush(0);

        let a = hub.session(0);
        assert!(!a.document().contains(id));
        assert_eq!(a.replica().pending_len(), 0);
    }

    #[test]
    fn test_remote_preview_links_editor() {
        let mut hub = Hub::new(2);
        let id = hub
            .session(0)
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        hub.flush(0);

        let t0 = Instant::now();
        hub.session(0).begin_edit(id, &[Property::Position]).unwrap();
        hub.session(0)
            .set_live(id, PropertyValue::Position(Vec2::new(3.0, 3.0)), t0)
            .unwrap();
        hub.flush(0);

        let a_id = hub.clients[0].0;
        let b = hub.session(1);
        assert!(b.document().overlay().is_edited_by(id, Editor::Remote(a_id)));
        assert_eq!(b.room().peer(a_id).unwrap().transform[0].x, 3.0);
        // Remote editors never shadow: B still shows the durable value.
        assert_eq!(position(b, id), Vec2::ZERO);

        hub.session(0)
            .commit_edit(id, &[Property::Position], t0 + Duration::from_millis(50))
            .unwrap();
        hub.flush(0);
        let b = hub.session(1);
        assert!(!b.document().overlay().is_edited_by(id, Editor::Remote(a_id)));
        assert_eq!(position(b, id), Vec2::new(3.0, 3.0));
    }

    #[test]
    fn test_disconnect_keeps_pending_for_resend() {
        let mut session = Session::default();
        session.handle_server_message(ServerMessage::Welcome {
            client_id: 1,
            id_base: 1_000_000,
            checkpoint: Checkpoint::default(),
            ops: Vec::new(),
            ephemeral: Vec::new(),
        });
        session
            .create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK)
            .unwrap();
        assert_eq!(session.take_outbound().len(), 1);

        session.on_disconnected();
        session.update_cursor(Some(Vec2::ONE), Instant::now());
        assert!(session.take_outbound().is_empty());
        assert_eq!(
            session.hello(),
            ClientMessage::Hello {
                client_id: Some(1),
                last_seq: Some(0)
            }
        );

        session.handle_server_message(ServerMessage::Welcome {
            client_id: 1,
            id_base: 1_000_000,
            checkpoint: Checkpoint::default(),
            ops: Vec::new(),
            ephemeral: Vec::new(),
        });
        assert_eq!(session.take_outbound().len(), 1);
    }
}
