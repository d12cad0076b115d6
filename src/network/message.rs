use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::fmt;

use crate::blockchain::{clock, Block, Transaction};
use crate::network::error::{NetworkError, NetworkResult};

/// Tag of every message kind on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    NewBlock,
    NewTransaction,
    BlockRequest,
    BlockResponse,
    PeerDiscovery,
    Ping,
    Pong,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::NewBlock => "NEW_BLOCK",
            MessageType::NewTransaction => "NEW_TRANSACTION",
            MessageType::BlockRequest => "BLOCK_REQUEST",
            MessageType::BlockResponse => "BLOCK_RESPONSE",
            MessageType::PeerDiscovery => "PEER_DISCOVERY",
            MessageType::Ping => "PING",
            MessageType::Pong => "PONG",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    NewBlock(Block),
    NewTransaction(Transaction),
    BlockRequest { hash: String },
    BlockResponse(Option<Block>),
    PeerDiscovery(Vec<String>),
    Ping,
    Pong,
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::NewBlock(_) => MessageType::NewBlock,
            Message::NewTransaction(_) => MessageType::NewTransaction,
            Message::BlockRequest { .. } => MessageType::BlockRequest,
            Message::BlockResponse(_) => MessageType::BlockResponse,
            Message::PeerDiscovery(_) => MessageType::PeerDiscovery,
            Message::Ping => MessageType::Ping,
            Message::Pong => MessageType::Pong,
        }
    }
}

/// A message stamped with its origin and creation time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub message: Message,

    /// Creation time in epoch milliseconds
    pub timestamp: i64,

    /// Identifier of the originating node
    pub from: String,
}

impl Envelope {
    pub fn new(message: Message, from: impl Into<String>) -> Self {
        Self {
            message,
            timestamp: clock::now_millis(),
            from: from.into(),
        }
    }

    pub fn kind(&self) -> MessageType {
        self.message.kind()
    }

    /// Converts to the `{type, data, timestamp, from}` transport shape
    pub fn to_wire(&self) -> NetworkResult<WireMessage> {
        let kind = self.kind();
        let data = match &self.message {
            Message::NewBlock(block) => to_data(kind, block)?,
            Message::NewTransaction(transaction) => to_data(kind, transaction)?,
            Message::BlockRequest { hash } => serde_json::json!({ "hash": hash }),
            Message::BlockResponse(block) => to_data(kind, block)?,
            Message::PeerDiscovery(peers) => to_data(kind, peers)?,
            Message::Ping | Message::Pong => Value::Null,
        };

        Ok(WireMessage {
            kind: kind.as_str().to_string(),
            data,
            timestamp: self.timestamp,
            from: self.from.clone(),
        })
    }
}

/// Transport representation of an [`Envelope`]
///
/// `kind` stays a plain string so that messages of unknown types still
/// decode and can be dropped at dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub data: Value,

    pub timestamp: i64,

    pub from: String,
}

#[derive(Deserialize)]
struct BlockRequestData {
    hash: String,
}

impl TryFrom<WireMessage> for Envelope {
    type Error = NetworkError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let kind: MessageType = serde_json::from_value(Value::String(wire.kind.clone()))
            .map_err(|_| NetworkError::UnknownMessageType(wire.kind.clone()))?;

        let message = match kind {
            MessageType::NewBlock => Message::NewBlock(from_data(kind, wire.data)?),
            MessageType::NewTransaction => Message::NewTransaction(from_data(kind, wire.data)?),
            MessageType::BlockRequest => {
                let request: BlockRequestData = from_data(kind, wire.data)?;
                Message::BlockRequest { hash: request.hash }
            }
            MessageType::BlockResponse => Message::BlockResponse(from_data(kind, wire.data)?),
            MessageType::PeerDiscovery => Message::PeerDiscovery(from_data(kind, wire.data)?),
            MessageType::Ping => Message::Ping,
            MessageType::Pong => Message::Pong,
        };

        Ok(Envelope {
            message,
            timestamp: wire.timestamp,
            from: wire.from,
        })
    }
}

fn to_data<T: Serialize>(kind: MessageType, value: &T) -> NetworkResult<Value> {
    serde_json::to_value(value).map_err(|e| NetworkError::MalformedPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

fn from_data<T: DeserializeOwned>(kind: MessageType, data: Value) -> NetworkResult<T> {
    serde_json::from_value(data).map_err(|e| NetworkError::MalformedPayload {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}
