use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;

use crate::error::NodeError;

/// Address of a peer: node id plus socket location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAddr {
    pub node_id: PublicKey,
    pub ip: String,
    pub port: u16,
}

/// The peer-to-peer wire layer (framing, noise handshake, reconnection) is
/// an external collaborator; this is the slice of it the node consumes.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn connect(&self, addr: &PeerAddr) -> Result<(), NodeError>;
    async fn disconnect(&self, node_id: &PublicKey) -> Result<(), NodeError>;
    async fn send(&self, node_id: &PublicKey, payload: Vec<u8>) -> Result<(), NodeError>;
    /// Whether the BOLT init exchange with the peer has completed.
    fn is_inited(&self, node_id: &PublicKey) -> bool;
    fn search(&self, node_id: &PublicKey) -> Option<PeerAddr>;
    fn connected_peers(&self) -> Vec<PeerAddr>;
}

/// In-process transport: tracks connections and captures outbound messages.
/// Stands in for the wire layer in the daemon and in tests.
#[derive(Default)]
pub struct MemoryPeerTransport {
    peers: Mutex<HashMap<PublicKey, (PeerAddr, bool)>>,
    pub sent: Mutex<Vec<(PublicKey, Vec<u8>)>>,
}

impl MemoryPeerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer without going through `connect`.
    pub fn add_peer(&self, addr: PeerAddr, inited: bool) {
        self.peers
            .lock()
            .unwrap()
            .insert(addr.node_id, (addr, inited));
    }

    pub fn set_inited(&self, node_id: &PublicKey, inited: bool) {
        if let Some(entry) = self.peers.lock().unwrap().get_mut(node_id) {
            entry.1 = inited;
        }
    }
}

#[async_trait]
impl PeerTransport for MemoryPeerTransport {
    async fn connect(&self, addr: &PeerAddr) -> Result<(), NodeError> {
        self.peers
            .lock()
            .unwrap()
            .insert(addr.node_id, (addr.clone(), true));
        Ok(())
    }

    async fn disconnect(&self, node_id: &PublicKey) -> Result<(), NodeError> {
        self.peers.lock().unwrap().remove(node_id);
        Ok(())
    }

    async fn send(&self, node_id: &PublicKey, payload: Vec<u8>) -> Result<(), NodeError> {
        if !self.peers.lock().unwrap().contains_key(node_id) {
            return Err(NodeError::Transport(format!(
                "peer {node_id} is not connected"
            )));
        }
        self.sent.lock().unwrap().push((*node_id, payload));
        Ok(())
    }

    fn is_inited(&self, node_id: &PublicKey) -> bool {
        self.peers
            .lock()
            .unwrap()
            .get(node_id)
            .map(|(_, inited)| *inited)
            .unwrap_or(false)
    }

    fn search(&self, node_id: &PublicKey) -> Option<PeerAddr> {
        self.peers
            .lock()
            .unwrap()
            .get(node_id)
            .map(|(addr, _)| addr.clone())
    }

    fn connected_peers(&self) -> Vec<PeerAddr> {
        self.peers
            .lock()
            .unwrap()
            .values()
            .map(|(addr, _)| addr.clone())
            .collect()
    }
}
