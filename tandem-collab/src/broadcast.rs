//! Fan-out of encoded server messages to connected clients.
//!
//! Every connection owns a bounded FIFO outbox. The authority actor encodes a
//! message once and enqueues the same `Arc<str>` into each outbox, so fan-out
//! never blocks sequencing and every client sees messages in sequence order.
//!
//! A client whose outbox is full is evicted rather than waited on: its sender
//! is dropped, the connection task drains what is queued and closes, and the
//! client reconnects to a fresh `Welcome`.

use std::collections::BTreeMap;
use std::sync::Arc;

use tandem_core::ClientId;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::protocol::{ProtocolError, ServerMessage};

/// Default per-connection outbox capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Pre-encoded JSON text frame.
pub type Frame = Arc<str>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub evictions: u64,
    pub active_peers: usize,
}

pub struct BroadcastGroup {
    peers: BTreeMap<ClientId, mpsc::Sender<Frame>>,
    capacity: usize,
    messages_sent: u64,
    evictions: u64,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: BTreeMap::new(),
            capacity: capacity.max(1),
            messages_sent: 0,
            evictions: 0,
        }
    }

    /// Register a client and return the receiving end of its outbox.
    ///
    /// Re-adding an id replaces (and thereby closes) the previous outbox.
    pub fn add_peer(&mut self, client_id: ClientId) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.peers.insert(client_id, tx).is_some() {
            log::warn!("Replaced outbox of client {client_id}");
        }
        rx
    }

    pub fn remove_peer(&mut self, client_id: ClientId) -> bool {
        self.peers.remove(&client_id).is_some()
    }

    /// Encode and enqueue `msg` for one client. Returns the evicted client
    /// if its outbox could not take it.
    pub fn send_to(
        &mut self,
        client_id: ClientId,
        msg: &ServerMessage,
    ) -> Result<Option<ClientId>, ProtocolError> {
        let frame: Frame = msg.encode()?.into();
        Ok(self.send_raw(client_id, frame))
    }

    /// Enqueue a pre-encoded frame for one client.
    pub fn send_raw(&mut self, client_id: ClientId, frame: Frame) -> Option<ClientId> {
        let outcome = match self.peers.get(&client_id) {
            Some(tx) => tx.try_send(frame),
            None => return None,
        };
        match outcome {
            Ok(()) => {
                self.messages_sent += 1;
                None
            }
            Err(e) => {
                self.evict(client_id, &e);
                Some(client_id)
            }
        }
    }

    /// Encode `msg` once and enqueue it for every client except `except`.
    ///
    /// Returns the clients evicted along the way.
    pub fn broadcast(
        &mut self,
        msg: &ServerMessage,
        except: Option<ClientId>,
    ) -> Result<Vec<ClientId>, ProtocolError> {
        let frame: Frame = msg.encode()?.into();
        Ok(self.broadcast_raw(frame, except))
    }

    pub fn broadcast_raw(&mut self, frame: Frame, except: Option<ClientId>) -> Vec<ClientId> {
        let mut failed = Vec::new();
        for (&client_id, tx) in &self.peers {
            if Some(client_id) == except {
                continue;
            }
            match tx.try_send(frame.clone()) {
                Ok(()) => self.messages_sent += 1,
                Err(e) => failed.push((client_id, e)),
            }
        }
        failed
            .into_iter()
            .map(|(client_id, e)| {
                self.evict(client_id, &e);
                client_id
            })
            .collect()
    }

    fn evict(&mut self, client_id: ClientId, reason: &TrySendError<Frame>) {
        self.peers.remove(&client_id);
        self.evictions += 1;
        match reason {
            TrySendError::Full(_) => {
                log::warn!("Evicting client {client_id}: outbox full ({})", self.capacity)
            }
            TrySendError::Closed(_) => log::debug!("Client {client_id} outbox already closed"),
        }
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, client_id: ClientId) -> bool {
        self.peers.contains_key(&client_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.peers.keys().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent,
            evictions: self.evictions,
            active_peers: self.peers.len(),
        }
    }
}

impl Default for BroadcastGroup {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn left(client_id: ClientId) -> ServerMessage {
        ServerMessage::UserLeft { client_id }
    }

    #[tokio::test]
    async fn test_broadcast_fan_out_in_order() {
        let mut group = BroadcastGroup::new(16);
        let mut rx1 = group.add_peer(1);
        let mut rx2 = group.add_peer(2);

        group.broadcast(&left(7), None).unwrap();
        group.broadcast(&left(8), None).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let first = ServerMessage::decode(&rx.recv().await.unwrap()).unwrap();
            let second = ServerMessage::decode(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(first, left(7));
            assert_eq!(second, left(8));
        }
        assert_eq!(group.stats().messages_sent, 4);
    }

    #[tokio::test]
    async fn test_broadcast_except_sender() {
        let mut group = BroadcastGroup::new(16);
        let mut rx1 = group.add_peer(1);
        let mut rx2 = group.add_peer(2);

        group.broadcast(&left(9), Some(1)).unwrap();
        assert!(rx1.try_recv().is_err());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_outbox_evicts() {
        let mut group = BroadcastGroup::new(2);
        let mut slow = group.add_peer(1);
        let mut fast = group.add_peer(2);

        for i in 0..2 {
            assert!(group.broadcast(&left(i), None).unwrap().is_empty());
            fast.recv().await.unwrap();
        }
        let evicted = group.broadcast(&left(3), None).unwrap();
        assert_eq!(evicted, vec![1]);
        assert!(!group.has_peer(1));
        assert_eq!(group.stats().evictions, 1);

        // The evicted outbox drains and then reports closed.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_to_single_peer() {
        let mut group = BroadcastGroup::new(4);
        let mut rx = group.add_peer(5);
        let _other = group.add_peer(6);

        assert_eq!(group.send_to(5, &left(1)).unwrap(), None);
        assert_eq!(group.send_to(42, &left(1)).unwrap(), None);
        let frame = rx.recv().await.unwrap();
        assert_eq!(&*frame, r#"{"type":"UserLeft","clientId":1}"#);
    }

    #[tokio::test]
    async fn test_closed_outbox_is_removed() {
        let mut group = BroadcastGroup::new(4);
        drop(group.add_peer(1));

        let evicted = group.broadcast(&left(2), None).unwrap();
        assert_eq!(evicted, vec![1]);
        assert_eq!(group.peer_count(), 0);
    }
}
