use thiserror::Error;

pub type NetworkResult<T> = Result<T, NetworkError>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Node is not running")]
    NotRunning,

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("Address {0} is already bound")]
    AddressInUse(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Malformed {kind} payload: {reason}")]
    MalformedPayload { kind: String, reason: String },
}
