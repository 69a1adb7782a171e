mod channel_machine;
mod engine;
mod node_rpc;

use bitcoin::hashes::Hash;
use bitcoin::Txid;

use crate::channel::{Channel, ChannelConfig};
use crate::types::{ChannelKeyManager, ChannelPublicKeys, KeysManager};
use crate::Network;

/// Channel base keys for a deterministic test identity.
pub(crate) fn test_channel_keys(seed_byte: u8) -> (ChannelKeyManager, ChannelPublicKeys) {
    let manager = KeysManager::new([seed_byte; 32], Network::Regtest);
    let keys = manager.derive_channel_keys(0);
    let public = keys.to_public_keys();
    (keys, public)
}

pub(crate) fn test_funding_txid() -> Txid {
    Txid::from_slice(&[0x11; 32]).unwrap()
}

/// Mirrored channel views for a 1_000_000 sat channel funded by side A
/// with 300_000 sat pushed to side B.
pub(crate) fn test_channel_pair() -> (Channel, Channel) {
    let (_, a_public) = test_channel_keys(0xa1);
    let (_, b_public) = test_channel_keys(0xb2);

    let base = ChannelConfig {
        funding_txid: test_funding_txid(),
        funding_vout: 0,
        funding_sat: 1_000_000,
        push_msat: 300_000_000,
        feerate_per_kw: 253,
        local_dust_limit_sat: 546,
        remote_dust_limit_sat: 546,
        local_to_self_delay: 144,
        remote_to_self_delay: 144,
        local_funder: true,
    };

    let channel_a = Channel::new(base.clone(), a_public.clone(), b_public.clone(), None).unwrap();
    let channel_b = Channel::new(
        ChannelConfig {
            local_funder: false,
            ..base
        },
        b_public,
        a_public,
        None,
    )
    .unwrap();

    (channel_a, channel_b)
}
