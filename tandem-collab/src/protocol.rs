//! JSON wire protocol.
//!
//! One message per WebSocket text frame, tagged by `type`, fields in
//! camelCase:
//! ```text
//! client → server   Hello | ClientOps | ClientEphemeral
//! server → client   Welcome | ServerOps | Reject | Correction
//!                   | ServerEphemeral | UserLeft
//! ```
//!
//! Ephemeral payloads are tagged by `kind` (`presence` / `transform`) and
//! never touch the journal.

use serde::{Deserialize, Serialize};
use tandem_core::{Checkpoint, ClientId, Op, Seq, Shape, ShapeId, Vec2};
use thiserror::Error;
use uuid::Uuid;

/// Client-chosen identity of a submitted op, stable across resends.
pub type ClientOpId = Uuid;

/// An op as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingOp {
    pub client_op_id: ClientOpId,
    pub op: Op,
}

/// An accepted op plus where it came from.
///
/// Origin is absent for ops that predate the current process or were
/// produced by the authority itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequencedOp {
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_op_id: Option<ClientOpId>,
}

impl SequencedOp {
    pub fn seq(&self) -> Seq {
        self.op.seq()
    }
}

/// Cursor position and selected shapes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Vec2>,
    #[serde(default)]
    pub selection: Vec<ShapeId>,
}

/// In-progress transform of one shape, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveTransform {
    pub id: ShapeId,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl LiveTransform {
    pub fn of(shape: &Shape) -> Self {
        Self {
            id: shape.id,
            x: shape.x,
            y: shape.y,
            rotation: shape.rotation,
            scale_x: shape.scale_x,
            scale_y: shape.scale_y,
        }
    }
}

/// Live transform previews. An empty list ends the preview.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformPreview {
    pub shapes: Vec<LiveTransform>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EphemeralData {
    Presence(Presence),
    Transform(TransformPreview),
}

/// Last known ephemeral state of one connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralSnapshot {
    pub client_id: ClientId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Presence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<Vec<LiveTransform>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Optional first message. Carries the identity of a previous session.
    Hello {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<ClientId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seq: Option<Seq>,
    },
    ClientOps {
        client_id: ClientId,
        base_seq: Seq,
        ops: Vec<OutgoingOp>,
    },
    ClientEphemeral {
        client_id: ClientId,
        data: EphemeralData,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        client_id: ClientId,
        id_base: ShapeId,
        checkpoint: Checkpoint,
        ops: Vec<SequencedOp>,
        #[serde(default)]
        ephemeral: Vec<EphemeralSnapshot>,
    },
    ServerOps {
        ops: Vec<SequencedOp>,
    },
    Reject {
        client_op_id: ClientOpId,
        reason: String,
    },
    /// The client's base is older than the checkpoint: replace everything.
    Correction {
        checkpoint: Checkpoint,
        ops: Vec<SequencedOp>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ServerEphemeral {
        client_id: ClientId,
        data: EphemeralData,
    },
    UserLeft {
        client_id: ClientId,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    /// Decode a binary frame holding UTF-8 JSON.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::Hello { .. } => "Hello",
            ClientMessage::ClientOps { .. } => "ClientOps",
            ClientMessage::ClientEphemeral { .. } => "ClientEphemeral",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn decode_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "Welcome",
            ServerMessage::ServerOps { .. } => "ServerOps",
            ServerMessage::Reject { .. } => "Reject",
            ServerMessage::Correction { .. } => "Correction",
            ServerMessage::ServerEphemeral { .. } => "ServerEphemeral",
            ServerMessage::UserLeft { .. } => "UserLeft",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}
