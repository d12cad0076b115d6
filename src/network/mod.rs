// Network module
//
// Peer-to-peer layer of the ledger:
// - Message kinds and their transport shape
// - The transport capability and an in-process implementation
// - The node that floods blocks and transactions and routes inbound messages

pub mod error;
pub mod message;
pub mod node;
pub mod transport;

pub use error::{NetworkError, NetworkResult};
pub use message::{Envelope, Message, MessageType, WireMessage};
pub use node::{BlockAnnouncer, BroadcastReport, Node};
pub use transport::{LocalTransport, MessageHandler, Transport};
