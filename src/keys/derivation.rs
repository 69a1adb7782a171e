use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use std::str::FromStr;

use crate::types::{ChannelKeyManager, ChannelPublicKeys, KeyFamily, KeysManager};

impl KeysManager {
    /// Create a new KeysManager from a 32-byte seed.
    pub fn new(seed: [u8; 32], network: Network) -> Self {
        let secp_ctx = Secp256k1::new();
        let master_key =
            Xpriv::new_master(network, &seed).expect("32-byte seeds always build a master key");
        Self {
            secp_ctx,
            master_key,
            network,
        }
    }

    /// Derive a key for a specific key family and channel index.
    /// Path: m/1017'/0'/<key_family>'/0/<channel_index>
    pub fn derive_key(&self, key_family: KeyFamily, channel_index: u32) -> SecretKey {
        let path = format!("m/1017'/0'/{}'/0/{}", key_family as u32, channel_index);
        let path = DerivationPath::from_str(&path).expect("fixed path template parses");
        let derived = self
            .master_key
            .derive_priv(&self.secp_ctx, &path)
            .expect("negligible probability");
        derived.private_key
    }

    /// Derive all base keys needed for one channel.
    pub fn derive_channel_keys(&self, channel_index: u32) -> ChannelKeyManager {
        ChannelKeyManager {
            funding_key: self.derive_key(KeyFamily::MultiSig, channel_index),
            revocation_basepoint_secret: self.derive_key(KeyFamily::RevocationBase, channel_index),
            payment_basepoint_secret: self.derive_key(KeyFamily::PaymentBase, channel_index),
            delayed_payment_basepoint_secret: self.derive_key(KeyFamily::DelayBase, channel_index),
            htlc_basepoint_secret: self.derive_key(KeyFamily::HtlcBase, channel_index),
            commitment_seed: self
                .derive_key(KeyFamily::CommitmentSeed, channel_index)
                .secret_bytes(),
            secp_ctx: self.secp_ctx.clone(),
        }
    }

    /// Long-lived node identity secret.
    pub fn node_secret(&self) -> SecretKey {
        self.derive_key(KeyFamily::NodeKey, 0)
    }

    pub fn node_id(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.secp_ctx, &self.node_secret())
    }
}

impl ChannelKeyManager {
    /// Derive all base public keys.
    pub fn to_public_keys(&self) -> ChannelPublicKeys {
        ChannelPublicKeys {
            funding_pubkey: PublicKey::from_secret_key(&self.secp_ctx, &self.funding_key),
            revocation_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.revocation_basepoint_secret,
            ),
            payment_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.payment_basepoint_secret,
            ),
            delayed_payment_basepoint: PublicKey::from_secret_key(
                &self.secp_ctx,
                &self.delayed_payment_basepoint_secret,
            ),
            htlc_basepoint: PublicKey::from_secret_key(&self.secp_ctx, &self.htlc_basepoint_secret),
        }
    }
}
