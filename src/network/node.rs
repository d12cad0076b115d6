use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use dashmap::DashSet;
use futures::future::join_all;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::blockchain::{Block, BlockAdmission, Ledger, Transaction};
use crate::config::NodeConfig;
use crate::network::error::{NetworkError, NetworkResult};
use crate::network::message::{Envelope, Message, MessageType, WireMessage};
use crate::network::transport::{MessageHandler, Transport};

/// Outcome of flooding one message to the peer set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    pub kind: MessageType,

    /// Peers the message was handed to
    pub delivered: Vec<String>,

    /// Peers that could not be reached, with the reason
    pub failed: Vec<(String, String)>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Something that can publish freshly produced blocks
#[async_trait]
pub trait BlockAnnouncer: Send + Sync {
    async fn announce_block(&self, block: &Block) -> NetworkResult<BroadcastReport>;
}

/// A peer in the gossip network
///
/// Turns local ledger events into broadcasts and inbound messages into
/// ledger calls. Several nodes can live in one process, each with its own
/// ledger, as long as they bind distinct addresses.
pub struct Node {
    id: String,
    ledger: Ledger,
    transport: Arc<dyn Transport>,
    config: NodeConfig,
    peers: DashSet<String>,
    running: AtomicBool,
    listen_address: RwLock<Option<String>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("listen_address", &self.listen_address())
            .field("peers", &self.peers.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Node {
    pub fn new(ledger: Ledger, transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ledger,
            transport,
            config,
            peers: DashSet::new(),
            running: AtomicBool::new(false),
            listen_address: RwLock::new(None),
        }
    }

    /// Binds `listen_address`, learns the bootstrap peers and announces itself
    pub async fn start(self: &Arc<Self>, listen_address: &str) -> NetworkResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Node {} is already running", self.id);
            return Ok(());
        }

        let handler: Weak<dyn MessageHandler> = Arc::downgrade(self) as Weak<Node>;
        if let Err(err) = self.transport.bind(listen_address, handler) {
            self.running.store(false, Ordering::SeqCst);
            return Err(err);
        }
        self.set_listen_address(Some(listen_address.to_string()));

        info!("Node {} listening on {}", self.id, listen_address);
        self.discover_peers().await;

        Ok(())
    }

    /// Stops handling and sending messages
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(address) = self.listen_address() {
            self.transport.unbind(&address);
        }
        self.set_listen_address(None);
        info!("Node {} stopped", self.id);
    }

    async fn discover_peers(&self) {
        let own = self.listen_address();
        for peer in &self.config.bootstrap_peers {
            if Some(peer) != own.as_ref() {
                self.peers.insert(peer.clone());
            }
        }

        if self.peers.is_empty() {
            debug!("Node {} has no peers to contact", self.id);
            return;
        }

        let mut known = self.peers();
        known.extend(own);

        match self.broadcast(Message::PeerDiscovery(known)).await {
            Ok(report) => info!(
                "Discovery reached {} of {} peers",
                report.delivered.len(),
                report.attempted()
            ),
            Err(err) => warn!("Peer discovery failed: {}", err),
        }
    }

    /// Floods a new block to every peer
    pub async fn announce_block(&self, block: &Block) -> NetworkResult<BroadcastReport> {
        self.broadcast(Message::NewBlock(block.clone())).await
    }

    /// Floods a new transaction to every peer
    pub async fn announce_transaction(&self, transaction: &Transaction) -> NetworkResult<BroadcastReport> {
        self.broadcast(Message::NewTransaction(transaction.clone())).await
    }

    /// Admits a transaction locally and floods it when accepted
    pub async fn submit_transaction(&self, transaction: Transaction) -> bool {
        if !self.ledger.admit_transaction(transaction.clone()) {
            return false;
        }

        if let Err(err) = self.announce_transaction(&transaction).await {
            warn!("Transaction {} admitted but not announced: {}", transaction.id, err);
        }
        true
    }

    /// Best-effort delivery to every peer
    ///
    /// Each peer is tried independently; failures are logged and collected
    /// in the report rather than returned.
    async fn broadcast(&self, message: Message) -> NetworkResult<BroadcastReport> {
        if !self.is_running() {
            return Err(NetworkError::NotRunning);
        }

        let from = self.listen_address().unwrap_or_default();
        let envelope = self.envelope(message);
        let kind = envelope.kind();
        let peers = self.peers();

        let deliveries = peers.into_iter().map(|peer| {
            let envelope = envelope.clone();
            let from = from.as_str();
            async move {
                let result = self.transport.send(from, &peer, envelope).await;
                (peer, result)
            }
        });

        let mut report = BroadcastReport {
            kind,
            delivered: Vec::new(),
            failed: Vec::new(),
        };

        for (peer, result) in join_all(deliveries).await {
            match result {
                Ok(reply) => {
                    if let Some(reply) = reply {
                        self.dispatch(reply, &peer);
                    }
                    report.delivered.push(peer);
                }
                Err(err) => {
                    warn!("Failed to deliver {} to {}: {}", kind, peer, err);
                    report.failed.push((peer, err.to_string()));
                }
            }
        }

        debug!(
            "Broadcast {} to {}/{} peers",
            kind,
            report.delivered.len(),
            report.attempted()
        );

        Ok(report)
    }

    /// Routes one inbound message into the ledger
    ///
    /// Never fails: rejected content is logged and dropped. Returns the
    /// direct reply, if the message kind has one.
    pub fn dispatch(&self, envelope: Envelope, from_peer: &str) -> Option<Envelope> {
        if !self.is_running() {
            debug!("Node {} is stopped, dropping {}", self.id, envelope.kind());
            return None;
        }

        match envelope.message {
            Message::NewBlock(block) => {
                self.receive_block(block, from_peer);
                None
            }
            Message::NewTransaction(transaction) => {
                let id = transaction.id.clone();
                if self.ledger.admit_transaction(transaction) {
                    debug!("Admitted transaction {} from {}", id, from_peer);
                } else {
                    debug!("Dropped transaction {} from {}", id, from_peer);
                }
                None
            }
            Message::BlockRequest { hash } => {
                let block = self.ledger.block_by_hash(&hash);
                if block.is_none() {
                    debug!("Block {} requested by {} not found", hash, from_peer);
                }
                Some(self.envelope(Message::BlockResponse(block)))
            }
            Message::BlockResponse(Some(block)) => {
                self.receive_block(block, from_peer);
                None
            }
            Message::BlockResponse(None) => {
                debug!("Peer {} did not have the requested block", from_peer);
                None
            }
            Message::PeerDiscovery(peers) => {
                let added = self.merge_peers(peers);
                if added > 0 {
                    info!("Learned {} new peers from {}", added, from_peer);
                }
                None
            }
            Message::Ping => Some(self.envelope(Message::Pong)),
            Message::Pong => {
                debug!("Pong from {}", from_peer);
                None
            }
        }
    }

    /// Decodes a transport message and dispatches it
    ///
    /// Unknown or malformed messages are logged and dropped.
    pub fn dispatch_wire(&self, wire: WireMessage, from_peer: &str) -> Option<WireMessage> {
        let envelope = match Envelope::try_from(wire) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("Dropping message from {}: {}", from_peer, err);
                return None;
            }
        };

        let reply = self.dispatch(envelope, from_peer)?;
        match reply.to_wire() {
            Ok(wire) => Some(wire),
            Err(err) => {
                warn!("Failed to encode {} reply: {}", reply.kind(), err);
                None
            }
        }
    }

    fn receive_block(&self, block: Block, from_peer: &str) {
        let index = block.index;
        match self.ledger.accept_block(block) {
            Ok(BlockAdmission::Appended) => info!("Appended block {} from {}", index, from_peer),
            Ok(BlockAdmission::Duplicate) => debug!("Block {} from {} already known", index, from_peer),
            Err(err) => warn!("Rejected block {} from {}: {}", index, from_peer, err),
        }
    }

    /// Sends a ping and waits for the pong
    pub async fn ping(&self, peer: &str) -> bool {
        match self.request(peer, Message::Ping).await {
            Ok(Some(reply)) => reply.message == Message::Pong,
            Ok(None) => false,
            Err(err) => {
                debug!("Ping to {} failed: {}", peer, err);
                false
            }
        }
    }

    /// Asks `peer` for the block with `hash`
    pub async fn request_block(&self, peer: &str, hash: &str) -> NetworkResult<Option<Block>> {
        let reply = self
            .request(peer, Message::BlockRequest { hash: hash.to_string() })
            .await?;

        match reply.map(|envelope| envelope.message) {
            Some(Message::BlockResponse(block)) => Ok(block),
            _ => Ok(None),
        }
    }

    async fn request(&self, peer: &str, message: Message) -> NetworkResult<Option<Envelope>> {
        if !self.is_running() {
            return Err(NetworkError::NotRunning);
        }

        let from = self.listen_address().unwrap_or_default();
        self.transport.send(&from, peer, self.envelope(message)).await
    }

    fn envelope(&self, message: Message) -> Envelope {
        Envelope::new(message, self.id.clone())
    }

    fn merge_peers(&self, peers: Vec<String>) -> usize {
        let own = self.listen_address();
        peers
            .into_iter()
            .filter(|peer| !peer.is_empty() && Some(peer) != own.as_ref())
            .filter(|peer| self.peers.insert(peer.clone()))
            .count()
    }

    pub fn add_peer(&self, peer: &str) -> bool {
        self.merge_peers(vec![peer.to_string()]) == 1
    }

    /// Known peers, sorted
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.peers.iter().map(|peer| peer.key().clone()).collect();
        peers.sort();
        peers
    }

    pub fn node_id(&self) -> &str {
        &self.id
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn listen_address(&self) -> Option<String> {
        self.listen_address
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_listen_address(&self, address: Option<String>) {
        *self
            .listen_address
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = address;
    }
}

impl MessageHandler for Node {
    fn handle(&self, envelope: Envelope, from_address: &str) -> Option<Envelope> {
        self.dispatch(envelope, from_address)
    }
}

#[async_trait]
impl BlockAnnouncer for Node {
    async fn announce_block(&self, block: &Block) -> NetworkResult<BroadcastReport> {
        Node::announce_block(self, block).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::network::transport::LocalTransport;

    fn node(transport: &Arc<LocalTransport>, bootstrap: &[&str]) -> Arc<Node> {
        let config = NodeConfig {
            bootstrap_peers: bootstrap.iter().map(|p| p.to_string()).collect(),
            ..NodeConfig::default()
        };
        let transport: Arc<dyn Transport> = transport.clone();
        Arc::new(Node::new(
            Ledger::new(LedgerConfig::with_difficulty(1)),
            transport,
            config,
        ))
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let transport = LocalTransport::new();
        let node = node(&transport, &[]);
        assert!(!node.is_running());

        node.start("a").await.unwrap();
        assert!(node.is_running());
        assert_eq!(node.listen_address().as_deref(), Some("a"));
        assert_eq!(transport.bound_addresses(), vec!["a".to_string()]);

        node.stop();
        assert!(!node.is_running());
        assert!(transport.bound_addresses().is_empty());
    }

    #[tokio::test]
    async fn test_node_ids_are_distinct() {
        let transport = LocalTransport::new();
        let first = node(&transport, &[]);
        let second = node(&transport, &[]);
        assert_ne!(first.node_id(), second.node_id());
    }

    #[tokio::test]
    async fn test_discovery_links_both_sides() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let b = node(&transport, &["a", "b"]);

        a.start("a").await.unwrap();
        b.start("b").await.unwrap();

        assert_eq!(b.peers(), vec!["a".to_string()]);
        assert_eq!(a.peers(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_announce_transaction_reaches_peer_pool() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let b = node(&transport, &["a"]);
        a.start("a").await.unwrap();
        b.start("b").await.unwrap();

        let transaction = Transaction::new("alice", "bob", 5, 1);
        assert!(b.submit_transaction(transaction.clone()).await);

        assert_eq!(a.ledger().pending_snapshot(), vec![transaction.clone()]);
        assert_eq!(b.ledger().pending_snapshot(), vec![transaction]);
    }

    #[tokio::test]
    async fn test_announce_block_extends_peer_chain() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let b = node(&transport, &["a"]);
        a.start("a").await.unwrap();
        b.start("b").await.unwrap();

        let block = b.ledger().produce_block("miner").unwrap();
        let report = b.announce_block(&block).await.unwrap();

        assert_eq!(report.kind, MessageType::NewBlock);
        assert_eq!(report.delivered, vec!["a".to_string()]);
        assert_eq!(a.ledger().tip(), block);

        // Duplicate delivery leaves the chain untouched
        b.announce_block(&block).await.unwrap();
        assert_eq!(a.ledger().len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_peer_does_not_block_others() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let c = node(&transport, &[]);
        let b = node(&transport, &["a", "ghost", "c"]);
        a.start("a").await.unwrap();
        c.start("c").await.unwrap();
        b.start("b").await.unwrap();

        let transaction = Transaction::new("alice", "bob", 5, 1);
        let report = b.announce_transaction(&transaction).await.unwrap();

        assert_eq!(report.delivered, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "ghost");
        assert_eq!(a.ledger().pending_len(), 1);
        assert_eq!(c.ledger().pending_len(), 1);
    }

    #[tokio::test]
    async fn test_announce_requires_running_node() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let block = Block::genesis();

        assert!(matches!(
            a.announce_block(&block).await,
            Err(NetworkError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_ping_and_block_request() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        let b = node(&transport, &[]);
        a.start("a").await.unwrap();
        b.start("b").await.unwrap();

        assert!(b.ping("a").await);
        assert!(!b.ping("nowhere").await);

        let block = a.ledger().produce_block("miner").unwrap();
        assert_eq!(b.request_block("a", &block.hash).await.unwrap(), Some(block));
        assert_eq!(b.request_block("a", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dispatch_routes_each_kind() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        a.start("a").await.unwrap();

        let reply = a.dispatch(Envelope::new(Message::Ping, "x"), "x");
        assert_eq!(reply.map(|r| r.message), Some(Message::Pong));

        assert!(a.dispatch(Envelope::new(Message::Pong, "x"), "x").is_none());

        let genesis = a.ledger().tip();
        let reply = a.dispatch(
            Envelope::new(Message::BlockRequest { hash: genesis.hash.clone() }, "x"),
            "x",
        );
        assert_eq!(
            reply.map(|r| r.message),
            Some(Message::BlockResponse(Some(genesis)))
        );

        a.dispatch(
            Envelope::new(Message::PeerDiscovery(vec!["p1".into(), "a".into(), "".into()]), "x"),
            "x",
        );
        assert_eq!(a.peers(), vec!["p1".to_string()]);

        let bad = Transaction::new("", "bob", 5, 0);
        assert!(a
            .dispatch(Envelope::new(Message::NewTransaction(bad), "x"), "x")
            .is_none());
        assert_eq!(a.ledger().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_invalid_block_from_peer_is_dropped() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        a.start("a").await.unwrap();

        let mut forged = Block::candidate(1, Vec::new(), a.ledger().tip().hash).unwrap();
        forged.hash = "0".repeat(64);

        assert!(a.dispatch(Envelope::new(Message::NewBlock(forged), "x"), "x").is_none());
        assert_eq!(a.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_wire_drops_unknown_types() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);
        a.start("a").await.unwrap();

        let unknown = WireMessage {
            kind: "SOMETHING_ELSE".to_string(),
            data: serde_json::Value::Null,
            timestamp: 1,
            from: "x".to_string(),
        };
        assert!(a.dispatch_wire(unknown, "x").is_none());

        let ping = Envelope::new(Message::Ping, "x").to_wire().unwrap();
        let reply = a.dispatch_wire(ping, "x").unwrap();
        assert_eq!(reply.kind, "PONG");
        assert_eq!(reply.from, a.node_id());
    }

    #[tokio::test]
    async fn test_stopped_node_drops_messages() {
        let transport = LocalTransport::new();
        let a = node(&transport, &[]);

        let transaction = Transaction::new("alice", "bob", 5, 1);
        assert!(a
            .dispatch(Envelope::new(Message::NewTransaction(transaction), "x"), "x")
            .is_none());
        assert!(a.dispatch(Envelope::new(Message::Ping, "x"), "x").is_none());
        assert_eq!(a.ledger().pending_len(), 0);
    }
}
