// Re-export commonly used external types
pub use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
pub use bitcoin::Network;

pub mod chain;
pub mod channel;
pub mod error;
pub mod keys;
pub mod node;
pub mod payment;
pub mod peer;
pub mod rpc;
pub mod scripts;
pub mod store;
pub mod transactions;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use error::{ChannelError, NodeError, RpcError, RpcErrorCode};
pub use types::*;

/// First per-commitment storage index. The index counts DOWN from here as
/// the channel advances; the wire-facing commitment number counts up.
pub const INITIAL_COMMITMENT_INDEX: u64 = (1 << 48) - 1;

/// Maximum number of hops a route may carry, including the source hop.
pub const MAX_ROUTE_HOPS: usize = 20;
