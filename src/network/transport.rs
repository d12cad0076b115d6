use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use log::debug;

use crate::network::error::{NetworkError, NetworkResult};
use crate::network::message::Envelope;

/// Receives messages delivered by a transport
pub trait MessageHandler: Send + Sync {
    /// Handles one inbound message, optionally producing a direct reply
    fn handle(&self, envelope: Envelope, from_address: &str) -> Option<Envelope>;
}

/// Delivery capability the node relies on
///
/// Implementations move envelopes between addresses and hand them to the
/// handler bound at the destination. Framing and connection management are
/// entirely up to the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Routes messages for `address` to `handler`
    fn bind(&self, address: &str, handler: Weak<dyn MessageHandler>) -> NetworkResult<()>;

    /// Stops routing messages for `address`
    fn unbind(&self, address: &str);

    /// Delivers `envelope` to `to_address` and returns the handler's reply
    async fn send(
        &self,
        from_address: &str,
        to_address: &str,
        envelope: Envelope,
    ) -> NetworkResult<Option<Envelope>>;
}

/// In-process transport connecting nodes that share one hub
///
/// Used to run several nodes inside a single process. Addresses can be
/// marked unreachable to simulate a partition.
#[derive(Default)]
pub struct LocalTransport {
    endpoints: DashMap<String, Weak<dyn MessageHandler>>,
    unreachable: DashSet<String>,
}

impl LocalTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `address` drop (or accept again) everything sent to it
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        if reachable {
            self.unreachable.remove(address);
        } else {
            self.unreachable.insert(address.to_string());
        }
    }

    /// Addresses with a live handler
    pub fn bound_addresses(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn bind(&self, address: &str, handler: Weak<dyn MessageHandler>) -> NetworkResult<()> {
        if let Some(existing) = self.endpoints.get(address) {
            if existing.strong_count() > 0 {
                return Err(NetworkError::AddressInUse(address.to_string()));
            }
        }

        self.endpoints.insert(address.to_string(), handler);
        debug!("Bound local endpoint {}", address);
        Ok(())
    }

    fn unbind(&self, address: &str) {
        self.endpoints.remove(address);
        debug!("Unbound local endpoint {}", address);
    }

    async fn send(
        &self,
        from_address: &str,
        to_address: &str,
        envelope: Envelope,
    ) -> NetworkResult<Option<Envelope>> {
        if self.unreachable.contains(to_address) {
            return Err(NetworkError::PeerUnreachable(to_address.to_string()));
        }

        // Clone the handle out so no map guard is held while handling
        let handler = self
            .endpoints
            .get(to_address)
            .map(|entry| entry.value().clone())
            .and_then(|weak| weak.upgrade())
            .ok_or_else(|| NetworkError::PeerUnreachable(to_address.to_string()))?;

        Ok(handler.handle(envelope, from_address))
    }
}
