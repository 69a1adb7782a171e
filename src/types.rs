use bitcoin::bip32::Xpriv;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{Network, Txid};

use crate::error::ChannelError;

// KEY FAMILY ENUM
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyFamily {
    MultiSig = 0,
    RevocationBase = 1,
    HtlcBase = 2,
    PaymentBase = 3,
    DelayBase = 4,
    CommitmentSeed = 5,
    NodeKey = 6,
}

// KEY MANAGEMENT STRUCTURES
// ============================================================================

pub struct KeysManager {
    pub secp_ctx: Secp256k1<All>,
    pub master_key: Xpriv,
    pub network: Network,
}

/// Holds every secret a single channel needs for signing.
pub struct ChannelKeyManager {
    /// Secret key used to sign commitment transactions
    pub funding_key: SecretKey,
    /// Base secret used to derive per-commitment revocation keys
    pub revocation_basepoint_secret: SecretKey,
    /// Secret key for immediately spendable balance
    pub payment_basepoint_secret: SecretKey,
    /// Base secret used to derive per-commitment delayed payment key
    pub delayed_payment_basepoint_secret: SecretKey,
    /// Base secret used to derive per-commitment HTLC key
    pub htlc_basepoint_secret: SecretKey,
    /// Seed used to generate per-commitment secrets
    pub commitment_seed: [u8; 32],
    /// Secp256k1 context for cryptographic operations
    pub secp_ctx: Secp256k1<All>,
}

/// Channel public keys which do not change over the life of a channel.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ChannelPublicKeys {
    /// Public key used to sign commitment transactions
    pub funding_pubkey: PublicKey,
    /// Base point used to derive per-commitment revocation keys
    pub revocation_basepoint: PublicKey,
    /// Public key for immediately spendable balance
    pub payment_basepoint: PublicKey,
    /// Base point used to derive per-commitment delayed payment key
    pub delayed_payment_basepoint: PublicKey,
    /// Base point used to derive per-commitment HTLC key
    pub htlc_basepoint: PublicKey,
}

// COMMITMENT KEYS STRUCTURE
// ============================================================================

/// The set of public keys used in the creation of one commitment transaction,
/// derived from the channel base points and the per-commitment point.
#[derive(Clone, Debug)]
pub struct CommitmentKeys {
    /// The per-commitment point used to derive the other keys
    pub per_commitment_point: PublicKey,

    /// The revocation key which allows the broadcaster's counterparty to punish
    /// them if they broadcast an old state
    pub revocation_key: PublicKey,

    /// Local party's HTLC key (derived from local_htlc_basepoint)
    pub local_htlc_key: PublicKey,

    /// Remote party's HTLC key (derived from remote_htlc_basepoint)
    pub remote_htlc_key: PublicKey,

    /// Local party's delayed payment key (for to_local output)
    pub local_delayed_payment_key: PublicKey,

    /// Remote party's payment key (for the to_remote P2WPKH output)
    pub to_remote_key: PublicKey,
}

// CHANNEL AND HTLC IDENTIFIERS
// ============================================================================

/// 32-byte channel identifier: the funding txid with the funding output
/// index XOR'd into the low two bytes.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    pub fn from_funding_outpoint(txid: &Txid, vout: u32) -> Self {
        use bitcoin::hashes::Hash;
        let mut id = txid.to_byte_array();
        id[30] ^= ((vout >> 8) & 0xff) as u8;
        id[31] ^= (vout & 0xff) as u8;
        Self(id)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let mut id = [0u8; 32];
        hex::decode_to_slice(s, &mut id).ok()?;
        Some(Self(id))
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Short channel id: block height, tx index and output index packed into 64
/// bits, printed as 16 hex digits.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShortChannelId(pub u64);

impl ShortChannelId {
    pub fn from_parts(height: u32, tx_index: u32, vout: u16) -> Self {
        Self(((height as u64) << 40) | ((tx_index as u64 & 0xff_ffff) << 16) | vout as u64)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Self)
    }
}

impl std::fmt::Display for ShortChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 48-bit commitment number as seen on the wire (counting up from zero).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommitmentNumber(u64);

impl CommitmentNumber {
    pub const MAX: u64 = (1 << 48) - 1;

    pub fn new(value: u64) -> Result<Self, ChannelError> {
        if value > Self::MAX {
            return Err(ChannelError::IndexOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

// HTLC STRUCTURES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HtlcDirection {
    Offered,
    Received,
}

/// One pending HTLC as it appears in a commitment transaction.
#[derive(Clone, Debug)]
pub struct HtlcInfo {
    pub direction: HtlcDirection,
    /// Amount in millisatoshi
    pub amount_msat: u64,
    /// CLTV expiry height
    pub cltv_expiry: u32,
    /// SHA-256 of the payment preimage
    pub payment_hash: [u8; 32],
    /// Witness script, cached after the first build
    pub witness_script: Option<ScriptBuf>,
}

impl HtlcInfo {
    pub fn new(
        direction: HtlcDirection,
        amount_msat: u64,
        cltv_expiry: u32,
        payment_hash: [u8; 32],
    ) -> Self {
        Self {
            direction,
            amount_msat,
            cltv_expiry,
            payment_hash,
            witness_script: None,
        }
    }

    pub fn amount_sat(&self) -> u64 {
        self.amount_msat / 1000
    }
}

/// Which side's commitment transaction a signing operation refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}
