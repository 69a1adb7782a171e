use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::chain::{genesis_hash, ChainSource};
use crate::channel::ChannelHandle;
use crate::error::RpcError;
use crate::payment::{InvoiceEncoder, RoutingOracle};
use crate::peer::{PeerAddr, PeerTransport};
use crate::store::NodeStore;
use crate::types::{ChannelId, KeysManager, ShortChannelId};

/// Floor feerate used when no override is set.
pub const DEFAULT_FEERATE_PER_KW: u64 = 253;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    ForceClosed,
}

/// Registry record for one channel. The live state is owned by the actor
/// behind `handle`; the record survives peer disconnection.
pub struct ChannelEntry {
    pub node_id: PublicKey,
    pub addr: PeerAddr,
    pub channel_id: ChannelId,
    pub short_channel_id: Option<ShortChannelId>,
    pub handle: Option<ChannelHandle>,
    pub state: ChannelState,
}

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: Network,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

/// Process-wide node context: the channel registry, the stores, the
/// external collaborators, and the RPC worker's mutable state.
pub struct Node {
    pub network: Network,
    pub genesis: ChainHash,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub keys: KeysManager,
    pub node_id: PublicKey,
    pub store: Arc<dyn NodeStore>,
    pub chain: Arc<dyn ChainSource>,
    pub router: Arc<dyn RoutingOracle>,
    pub transport: Arc<dyn PeerTransport>,
    pub bolt11: Arc<dyn InvoiceEncoder>,
    pub channels: Mutex<HashMap<PublicKey, ChannelEntry>>,
    pub peer_errors: Mutex<HashMap<PublicKey, RpcError>>,
    // RPC worker state
    pub last_pay_err: Mutex<Option<String>>,
    pub pay_try_count: AtomicU32,
    pub auto_connect_disabled: AtomicBool,
    pub debug_flags: AtomicU64,
    pub feerate_override: AtomicU64,
    pub block_height: AtomicI32,
    pub next_channel_index: AtomicU32,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub fn new(
        seed: [u8; 32],
        config: NodeConfig,
        store: Arc<dyn NodeStore>,
        chain: Arc<dyn ChainSource>,
        router: Arc<dyn RoutingOracle>,
        transport: Arc<dyn PeerTransport>,
        bolt11: Arc<dyn InvoiceEncoder>,
    ) -> Arc<Self> {
        let keys = KeysManager::new(seed, config.network);
        let node_id = keys.node_id();
        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            network: config.network,
            genesis: genesis_hash(config.network),
            p2p_port: config.p2p_port,
            rpc_port: config.rpc_port,
            keys,
            node_id,
            store,
            chain,
            router,
            transport,
            bolt11,
            channels: Mutex::new(HashMap::new()),
            peer_errors: Mutex::new(HashMap::new()),
            last_pay_err: Mutex::new(None),
            pay_try_count: AtomicU32::new(0),
            auto_connect_disabled: AtomicBool::new(false),
            debug_flags: AtomicU64::new(0),
            feerate_override: AtomicU64::new(0),
            block_height: AtomicI32::new(0),
            next_channel_index: AtomicU32::new(0),
            shutdown,
        })
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Feerate for new commitments: the `setfeerate` override when present,
    /// otherwise the floor.
    pub fn feerate_per_kw(&self) -> u64 {
        match self.feerate_override.load(Ordering::SeqCst) {
            0 => DEFAULT_FEERATE_PER_KW,
            feerate => feerate,
        }
    }

    // CHANNEL REGISTRY
    // ========================================================================

    pub fn channel_handle(&self, node_id: &PublicKey) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .unwrap()
            .get(node_id)
            .and_then(|entry| entry.handle.clone())
    }

    pub fn channel_state(&self, node_id: &PublicKey) -> Option<ChannelState> {
        self.channels
            .lock()
            .unwrap()
            .get(node_id)
            .map(|entry| entry.state)
    }

    pub fn register_channel(&self, entry: ChannelEntry) {
        self.channels.lock().unwrap().insert(entry.node_id, entry);
    }

    pub fn set_channel_state(&self, node_id: &PublicKey, state: ChannelState) {
        if let Some(entry) = self.channels.lock().unwrap().get_mut(node_id) {
            entry.state = state;
        }
    }

    pub fn drop_channel_handle(&self, node_id: &PublicKey) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .unwrap()
            .get_mut(node_id)
            .and_then(|entry| entry.handle.take())
    }

    pub fn remove_channel_by_id(&self, channel_id: &ChannelId) -> bool {
        let mut channels = self.channels.lock().unwrap();
        let key = channels
            .iter()
            .find(|(_, entry)| entry.channel_id == *channel_id)
            .map(|(k, _)| *k);
        match key {
            Some(k) => {
                channels.remove(&k);
                true
            }
            None => false,
        }
    }

    // PEER ERRORS
    // ========================================================================

    pub fn set_peer_error(&self, node_id: &PublicKey, error: RpcError) {
        self.peer_errors.lock().unwrap().insert(*node_id, error);
    }

    pub fn peer_error(&self, node_id: &PublicKey) -> Option<RpcError> {
        self.peer_errors.lock().unwrap().get(node_id).cloned()
    }

    // AGGREGATES
    // ========================================================================

    /// Sum of our balance across all live channels.
    pub async fn total_local_msat(&self) -> u64 {
        let handles: Vec<ChannelHandle> = self
            .channels
            .lock()
            .unwrap()
            .values()
            .filter_map(|entry| entry.handle.clone())
            .collect();

        let mut total = 0u64;
        for handle in handles {
            if let Ok(snapshot) = handle.snapshot().await {
                total += snapshot.local_msat;
            }
        }
        total
    }

    /// Stop every channel actor and the RPC server, then release the peers.
    pub async fn stop(&self) {
        info!("stop requested");
        let handles: Vec<ChannelHandle> = self
            .channels
            .lock()
            .unwrap()
            .values()
            .filter_map(|entry| entry.handle.clone())
            .collect();
        for handle in handles {
            handle.stop().await;
        }
        for peer in self.transport.connected_peers() {
            let _ = self.transport.disconnect(&peer.node_id).await;
        }
        self.shutdown.send_replace(true);
    }
}

// CHAIN MONITOR WORKER
// ============================================================================

/// Poll the chain for the block height and reconnect known peers while
/// auto-reconnect is enabled. Runs until the node's stop signal.
pub async fn run_chain_monitor(node: Arc<Node>, poll_interval: Duration) {
    let mut shutdown = node.shutdown_signal();
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                match node.chain.get_block_count().await {
                    Ok(height) => {
                        let previous = node.block_height.swap(height, Ordering::SeqCst);
                        if height != previous {
                            debug!("block height {height}");
                        }
                    }
                    Err(e) => warn!("chain poll failed: {e}"),
                }

                if !node.auto_connect_disabled.load(Ordering::SeqCst) {
                    let targets: Vec<PeerAddr> = node
                        .channels
                        .lock()
                        .unwrap()
                        .values()
                        .filter(|entry| {
                            entry.state != ChannelState::ForceClosed
                                && node.transport.search(&entry.node_id).is_none()
                        })
                        .map(|entry| entry.addr.clone())
                        .collect();
                    for addr in targets {
                        if let Err(e) = node.transport.connect(&addr).await {
                            debug!("auto reconnect to {} failed: {e}", addr.node_id);
                        }
                    }
                }
            }
        }
    }
    info!("chain monitor stopped");
}
