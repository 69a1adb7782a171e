use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::blockdata::constants::ChainHash;
use bitcoin::Network;
use lightning_block_sync::http::{HttpEndpoint, JsonResponse};
use lightning_block_sync::rpc::RpcClient;

use crate::error::NodeError;

/// Genesis hash identifying the chain a channel lives on.
pub fn genesis_hash(network: Network) -> ChainHash {
    ChainHash::using_genesis_block(network)
}

/// Recognize a chain by comparing its 32-byte genesis hash.
pub fn network_from_genesis(hash: &ChainHash) -> Option<Network> {
    if *hash == ChainHash::BITCOIN {
        Some(Network::Bitcoin)
    } else if *hash == ChainHash::TESTNET {
        Some(Network::Testnet)
    } else if *hash == ChainHash::SIGNET {
        Some(Network::Signet)
    } else if *hash == ChainHash::REGTEST {
        Some(Network::Regtest)
    } else {
        None
    }
}

/// Blockchain-RPC collaborator contract.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn get_block_count(&self) -> Result<i32, NodeError>;
}

pub struct BlockCountResponse(pub i32);

impl TryInto<BlockCountResponse> for JsonResponse {
    type Error = std::io::Error;
    fn try_into(self) -> std::io::Result<BlockCountResponse> {
        match self.0.as_i64() {
            Some(count) => Ok(BlockCountResponse(count as i32)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "getblockcount: expected a number",
            )),
        }
    }
}

/// Chain access through bitcoind's JSON-RPC interface.
pub struct BitcoindClient {
    rpc: Arc<RpcClient>,
}

impl BitcoindClient {
    pub fn new(host: &str, port: u16, rpc_user: &str, rpc_password: &str) -> std::io::Result<Self> {
        let http_endpoint = HttpEndpoint::for_host(host.to_string()).with_port(port);
        let rpc_credentials = base64::encode(format!("{}:{}", rpc_user, rpc_password));
        let rpc = RpcClient::new(&rpc_credentials, http_endpoint)?;
        Ok(Self { rpc: Arc::new(rpc) })
    }
}

#[async_trait]
impl ChainSource for BitcoindClient {
    async fn get_block_count(&self) -> Result<i32, NodeError> {
        let count: BlockCountResponse = self
            .rpc
            .call_method("getblockcount", &[])
            .await
            .map_err(|e| NodeError::Chain(e.to_string()))?;
        Ok(count.0)
    }
}

/// Fixed-height chain view for tests and offline operation.
#[derive(Default)]
pub struct StaticChain {
    height: AtomicI32,
}

impl StaticChain {
    pub fn new(height: i32) -> Self {
        Self {
            height: AtomicI32::new(height),
        }
    }

    pub fn set_height(&self, height: i32) {
        self.height.store(height, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChainSource for StaticChain {
    async fn get_block_count(&self) -> Result<i32, NodeError> {
        Ok(self.height.load(Ordering::SeqCst))
    }
}
