//! WebSocket sync client.
//!
//! Wraps a [`Session`] behind an async mutex and drives it over a
//! tokio-tungstenite connection:
//! - a writer task drains the outgoing channel into text frames
//! - a reader task decodes server messages, feeds the session and forwards
//!   a [`SyncEvent`] per message
//! - a ticker task releases throttled ephemeral updates
//!
//! Edits made while disconnected stay pending in the session and go out
//! after the next `Welcome`. Reconnecting sends `Hello` with the previous
//! client id so the id block is kept.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tandem_core::ClientId;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::presence::EPHEMERAL_INTERVAL;
use crate::protocol::{ClientMessage, ClientOpId, ProtocolError, ServerMessage};
use crate::session::{Session, SessionConfig, SessionEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Socket open, `Hello` sent
    Connected,
    /// Connection lost; pending edits are kept
    Disconnected,
    /// Server assigned our id and state
    Welcomed { client_id: ClientId },
    /// Authoritative ops applied to the document
    RemoteOps { foreign: usize },
    /// One of our ops was refused
    Rejected { client_op_id: ClientOpId, reason: String },
    /// Server replaced our state wholesale
    Corrected,
    /// Remote cursor, selection or preview changed
    PeerUpdated(ClientId),
    /// A peer disconnected
    PeerLeft(ClientId),
}

impl From<SessionEvent> for SyncEvent {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::Welcomed { client_id } => SyncEvent::Welcomed { client_id },
            SessionEvent::OpsApplied { foreign } => SyncEvent::RemoteOps { foreign },
            SessionEvent::Rejected {
                client_op_id,
                reason,
            } => SyncEvent::Rejected {
                client_op_id,
                reason,
            },
            SessionEvent::Corrected => SyncEvent::Corrected,
            SessionEvent::PeerUpdated { client_id } => SyncEvent::PeerUpdated(client_id),
            SessionEvent::PeerLeft { client_id } => SyncEvent::PeerLeft(client_id),
        }
    }
}

/// The sync client.
pub struct SyncClient {
    /// Local replica, history and presence
    session: Arc<Mutex<Session>>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<ClientMessage>>,

    /// Tells the current connection's writer to close the socket
    shutdown_tx: Option<watch::Sender<bool>>,

    /// Bumped per connection so a stale reader cannot clobber a newer one
    generation: Arc<AtomicU64>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (cloned into the reader task)
    event_tx: mpsc::Sender<SyncEvent>,

    /// Server URL, e.g. `ws://127.0.0.1:9090`
    server_url: String,
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_config(server_url, SessionConfig::default())
    }

    pub fn with_config(server_url: impl Into<String>, config: SessionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            session: Arc::new(Mutex::new(Session::new(config))),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            shutdown_tx: None,
            generation: Arc::new(AtomicU64::new(0)),
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect (or reconnect) to the server and send `Hello`.
    ///
    /// Returns once the socket is open; the `Welcome` arrives as a
    /// [`SyncEvent::Welcomed`].
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        let reconnecting = self.session.lock().await.client_id().is_some();
        *self.state.write().await = if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        };

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Writer task: forward the outgoing channel to the socket.
        let (out_tx, mut out_rx) = mpsc::channel::<ClientMessage>(256);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    _ = shutdown_rx.changed() => break,
                };
                let text = match msg.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        log::error!("Failed to encode {}: {e}", msg.type_name());
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        let hello = self.session.lock().await.hello();
        out_tx
            .send(hello)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        self.outgoing_tx = Some(out_tx.clone());

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, SyncEvent::Connected);

        // Ticker task: release trailing cursor/preview updates.
        let session = self.session.clone();
        let ticker_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EPHEMERAL_INTERVAL);
            loop {
                ticker.tick().await;
                if ticker_tx.is_closed() {
                    break;
                }
                let mut session = session.lock().await;
                session.poll_ephemeral(Instant::now());
                if flush_locked(&mut session, &ticker_tx).await.is_err() {
                    break;
                }
            }
        });

        // Reader task: feed server messages into the session.
        let session = self.session.clone();
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let current = self.generation.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                let decoded = match frame {
                    Ok(Message::Text(text)) => ServerMessage::decode(text.as_str()),
                    Ok(Message::Binary(data)) => ServerMessage::decode_bytes(&data),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let msg = match decoded {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("Ignoring undecodable server frame: {e}");
                        continue;
                    }
                };

                let event = {
                    let mut session = session.lock().await;
                    if current.load(Ordering::SeqCst) != generation {
                        return;
                    }
                    let event = session.handle_server_message(msg);
                    if flush_locked(&mut session, &out_tx).await.is_err() {
                        break;
                    }
                    event
                };
                emit(&event_tx, event.into());
            }

            if current.load(Ordering::SeqCst) != generation {
                return;
            }
            session.lock().await.on_disconnected();
            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, SyncEvent::Disconnected);
        });

        Ok(())
    }

    /// Close the connection. Pending edits survive for the next `connect`.
    pub async fn disconnect(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(true);
        }
        self.outgoing_tx = None;
        self.session.lock().await.on_disconnected();
        *self.state.write().await = ConnectionState::Disconnected;
    }

    /// Run an intent against the session and send whatever it produced.
    ///
    /// ```ignore
    /// let id = client.edit(|s| s.create_shape(ShapeKind::Rect, pos, color)).await?;
    /// ```
    pub async fn edit<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.lock().await;
        let result = f(&mut session);
        if let Some(tx) = &self.outgoing_tx {
            if flush_locked(&mut session, tx).await.is_err() {
                log::debug!("Connection closed; edits stay pending");
            }
        }
        result
    }

    /// Read-only access to the session (document, presence, history).
    pub async fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&*self.session.lock().await)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn client_id(&self) -> Option<ClientId> {
        self.session.lock().await.client_id()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Events are advisory; a full or unread queue must not stall sync.
fn emit(tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(e) = tx.try_send(event) {
        log::debug!("Dropping sync event: {e}");
    }
}

/// Send everything the session has queued. The caller holds the session
/// lock, so batches leave in the order they were produced.
async fn flush_locked(
    session: &mut Session,
    tx: &mpsc::Sender<ClientMessage>,
) -> Result<(), ProtocolError> {
    for msg in session.take_outbound() {
        tx.send(msg)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{Color, ShapeKind, Vec2};
    use uuid::Uuid;

    #[test]
    fn test_session_event_mapping() {
        let id = Uuid::new_v4();
        assert_eq!(
            SyncEvent::from(SessionEvent::Rejected {
                client_op_id: id,
                reason: "shape 4 does not exist".into()
            }),
            SyncEvent::Rejected {
                client_op_id: id,
                reason: "shape 4 does not exist".into()
            }
        );
        assert_eq!(
            SyncEvent::from(SessionEvent::PeerLeft { client_id: 3 }),
            SyncEvent::PeerLeft(3)
        );
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = SyncClient::new("ws://127.0.0.1:1");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert_eq!(client.client_id().await, None);
        assert_eq!(client.server_url(), "ws://127.0.0.1:1");
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        // Port 1 is reserved and nothing listens there.
        let mut client = SyncClient::new("ws://127.0.0.1:1");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_edit_offline_stays_pending() {
        let client = SyncClient::new("ws://127.0.0.1:1");
        let result = client
            .edit(|s| s.create_shape(ShapeKind::Rect, Vec2::ZERO, Color::BLACK))
            .await;
        assert!(result.is_err());
        assert!(!client.with_session(|s| s.can_undo()).await);
    }
}
