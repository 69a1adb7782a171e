use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::locktime::absolute::LockTime;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Txid, Witness};

use crate::error::ChannelError;
use crate::scripts::{create_to_local_script, create_to_remote_script};
use crate::transactions::fees::FeeInfo;
use crate::types::{CommitmentKeys, CommitmentNumber, HtlcInfo, Side};

// OBSCURED COMMITMENT NUMBER
// ============================================================================

/// 48-bit obscure factor: the low six bytes of
/// SHA256(open_payment_basepoint || accept_payment_basepoint), big-endian.
pub fn commitment_obscure_factor(
    open_payment_basepoint: &PublicKey,
    accept_payment_basepoint: &PublicKey,
) -> u64 {
    let mut engine = Sha256::engine();
    engine.input(&open_payment_basepoint.serialize());
    engine.input(&accept_payment_basepoint.serialize());
    let res = Sha256::from_engine(engine).to_byte_array();

    let mut obs = 0u64;
    for byte in &res[26..32] {
        obs = (obs << 8) | *byte as u64;
    }
    obs
}

/// Funding input sequence: 0x80 prefix over the upper 24 bits.
pub fn commitment_sequence(obscured: u64) -> Sequence {
    Sequence::from_consensus(0x8000_0000 | ((obscured >> 24) & 0x00ff_ffff) as u32)
}

/// Commitment locktime: 0x20 prefix over the lower 24 bits.
pub fn commitment_locktime(obscured: u64) -> LockTime {
    LockTime::from_consensus(0x2000_0000 | (obscured & 0x00ff_ffff) as u32)
}

pub fn encode_commitment_number(
    number: CommitmentNumber,
    obscure_factor: u64,
) -> (Sequence, LockTime) {
    let obscured = number.value() ^ obscure_factor;
    (commitment_sequence(obscured), commitment_locktime(obscured))
}

/// Recover the commitment number from a broadcast commitment transaction.
/// Returns None when the prefixes do not match a commitment encoding.
pub fn decode_commitment_number(
    sequence: Sequence,
    lock_time: LockTime,
    obscure_factor: u64,
) -> Option<CommitmentNumber> {
    let seq = sequence.to_consensus_u32();
    let lt = lock_time.to_consensus_u32();
    if seq >> 24 != 0x80 || lt >> 24 != 0x20 {
        return None;
    }
    let obscured = ((seq as u64 & 0x00ff_ffff) << 24) | (lt as u64 & 0x00ff_ffff);
    CommitmentNumber::new(obscured ^ obscure_factor).ok()
}

// COMMITMENT CONSTRUCTION
// ============================================================================

/// Description of the funding input every commitment transaction spends.
#[derive(Clone, Debug)]
pub struct FundingInfo {
    pub txid: Txid,
    pub vout: u32,
    pub amount_sat: u64,
    /// The 2-of-2 redeem script
    pub redeem_script: ScriptBuf,
    pub local_funding_key: SecretKey,
    pub remote_funding_pubkey: PublicKey,
}

impl FundingInfo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }
}

/// What a commitment output pays to. The tag survives the BIP-69 sort so
/// second-stage builders can locate their output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputRole {
    ToLocal,
    ToRemote,
    /// Index into the commit context's HTLC list
    Htlc(usize),
}

#[derive(Clone, Debug)]
pub struct CommitOutput {
    pub value_sat: u64,
    pub script_pubkey: ScriptBuf,
    pub cltv_expiry: Option<u32>,
    pub role: OutputRole,
}

/// Ephemeral, per-signing view of a channel: everything needed to build and
/// sign one side's commitment transaction.
#[derive(Clone, Debug)]
pub struct CommitContext {
    pub side: Side,
    pub funding: FundingInfo,
    pub keys: CommitmentKeys,
    pub to_self_delay: u16,
    pub fee: FeeInfo,
    pub local_msat: u64,
    pub remote_msat: u64,
    /// Commit-fee share borne by the local balance (the funder's share)
    pub local_fee_sat: u64,
    /// Commit-fee share borne by the remote balance
    pub remote_fee_sat: u64,
    pub obscured_commitment_number: u64,
    /// Ordered HTLC list with witness scripts resolved
    pub htlcs: Vec<HtlcInfo>,
}

/// A commitment transaction plus the per-output role tags in final order.
#[derive(Clone, Debug)]
pub struct BuiltCommitment {
    pub tx: Transaction,
    pub roles: Vec<OutputRole>,
    pub to_local_script: ScriptBuf,
}

impl BuiltCommitment {
    pub fn output_index(&self, role: OutputRole) -> Option<usize> {
        self.roles.iter().position(|r| *r == role)
    }
}

/// Sort outputs by value, then script pubkey, then CLTV expiry. The role
/// tags are permuted together with the outputs.
pub fn sort_outputs(outputs: &mut [CommitOutput]) {
    outputs.sort_by(|a, b| {
        a.value_sat
            .cmp(&b.value_sat)
            .then_with(|| a.script_pubkey.as_bytes().cmp(b.script_pubkey.as_bytes()))
            .then_with(|| a.cltv_expiry.cmp(&b.cltv_expiry))
    });
}

/// Assemble one side's commitment transaction.
///
/// Output order before sorting: to_remote (P2WPKH), to_local (P2WSH), then
/// each untrimmed HTLC. Outputs that cannot cover the dust limit plus their
/// fee share are absorbed into the fee.
pub fn build_commitment_tx(ctx: &CommitContext) -> BuiltCommitment {
    let dust = ctx.fee.dust_limit_sat;
    let mut outputs: Vec<CommitOutput> = Vec::new();

    let to_remote_sat = ctx.remote_msat / 1000;
    if to_remote_sat >= dust + ctx.remote_fee_sat {
        outputs.push(CommitOutput {
            value_sat: to_remote_sat - ctx.remote_fee_sat,
            script_pubkey: create_to_remote_script(&ctx.keys.to_remote_key),
            cltv_expiry: None,
            role: OutputRole::ToRemote,
        });
    }

    let to_local_script = create_to_local_script(
        &ctx.keys.revocation_key,
        &ctx.keys.local_delayed_payment_key,
        ctx.to_self_delay,
    );
    let to_local_sat = ctx.local_msat / 1000;
    if to_local_sat >= dust + ctx.local_fee_sat {
        outputs.push(CommitOutput {
            value_sat: to_local_sat - ctx.local_fee_sat,
            script_pubkey: to_local_script.to_p2wsh(),
            cltv_expiry: None,
            role: OutputRole::ToLocal,
        });
    }

    for (index, htlc) in ctx.htlcs.iter().enumerate() {
        if ctx.fee.is_trimmed(htlc) {
            continue;
        }
        let script = htlc
            .witness_script
            .as_ref()
            .expect("HTLC scripts are resolved before the commitment is built");
        outputs.push(CommitOutput {
            value_sat: htlc.amount_sat(),
            script_pubkey: script.to_p2wsh(),
            cltv_expiry: Some(htlc.cltv_expiry),
            role: OutputRole::Htlc(index),
        });
    }

    sort_outputs(&mut outputs);

    let roles: Vec<OutputRole> = outputs.iter().map(|o| o.role).collect();
    let tx = Transaction {
        version: Version::TWO,
        lock_time: commitment_locktime(ctx.obscured_commitment_number),
        input: vec![TxIn {
            previous_output: ctx.funding.outpoint(),
            script_sig: ScriptBuf::new(),
            sequence: commitment_sequence(ctx.obscured_commitment_number),
            witness: Witness::new(),
        }],
        output: outputs
            .into_iter()
            .map(|o| TxOut {
                value: Amount::from_sat(o.value_sat),
                script_pubkey: o.script_pubkey,
            })
            .collect(),
    };

    BuiltCommitment {
        tx,
        roles,
        to_local_script,
    }
}

// SIGNING AND VERIFICATION
// ============================================================================

/// BIP-143 sighash for a P2WSH input, as a signable message.
pub fn p2wsh_sighash(
    tx: &Transaction,
    input_index: usize,
    witness_script: &ScriptBuf,
    amount_sat: u64,
) -> Message {
    let mut sighash_cache = SighashCache::new(tx);
    let sighash = sighash_cache
        .p2wsh_signature_hash(
            input_index,
            witness_script,
            Amount::from_sat(amount_sat),
            EcdsaSighashType::All,
        )
        .expect("input index is in range");
    Message::from_digest(sighash.to_byte_array())
}

/// Sign a P2WSH input with SIGHASH_ALL; returns DER || 0x01.
pub fn sign_p2wsh_input(
    tx: &Transaction,
    input_index: usize,
    witness_script: &ScriptBuf,
    amount_sat: u64,
    secret_key: &SecretKey,
    secp: &Secp256k1<All>,
) -> Vec<u8> {
    let msg = p2wsh_sighash(tx, input_index, witness_script, amount_sat);
    let sig = secp.sign_ecdsa(&msg, secret_key);
    let mut sig_bytes = sig.serialize_der().to_vec();
    sig_bytes.push(EcdsaSighashType::All as u8);
    sig_bytes
}

/// Check a counterparty signature (DER || hashtype) against the expected
/// public key. A mismatch is a fatal protocol violation.
pub fn verify_p2wsh_signature(
    tx: &Transaction,
    input_index: usize,
    witness_script: &ScriptBuf,
    amount_sat: u64,
    signature: &[u8],
    pubkey: &PublicKey,
    secp: &Secp256k1<All>,
) -> Result<(), ChannelError> {
    if signature.is_empty() {
        return Err(ChannelError::InvalidSignature);
    }
    let msg = p2wsh_sighash(tx, input_index, witness_script, amount_sat);
    let sig = bitcoin::secp256k1::ecdsa::Signature::from_der(&signature[..signature.len() - 1])
        .map_err(|_| ChannelError::InvalidSignature)?;
    secp.verify_ecdsa(&msg, &sig, pubkey)
        .map_err(|_| ChannelError::SignatureMismatch)
}

/// Produce the local signature over the funding 2-of-2.
pub fn sign_commitment_tx(
    tx: &Transaction,
    funding: &FundingInfo,
    secp: &Secp256k1<All>,
) -> Vec<u8> {
    sign_p2wsh_input(
        tx,
        0,
        &funding.redeem_script,
        funding.amount_sat,
        &funding.local_funding_key,
        secp,
    )
}

/// Verify the counterparty's signature on a commitment transaction.
pub fn verify_commitment_signature(
    tx: &Transaction,
    funding: &FundingInfo,
    signature: &[u8],
    secp: &Secp256k1<All>,
) -> Result<(), ChannelError> {
    verify_p2wsh_signature(
        tx,
        0,
        &funding.redeem_script,
        funding.amount_sat,
        signature,
        &funding.remote_funding_pubkey,
        secp,
    )
}

/// Funding-input witness: `[0, sig, sig, redeem_script]` with the signatures
/// in the same order as the pubkeys in the sorted 2-of-2 script.
pub fn create_commitment_witness(
    funding: &FundingInfo,
    local_signature: &[u8],
    remote_signature: &[u8],
    secp: &Secp256k1<All>,
) -> Witness {
    let local_pubkey = PublicKey::from_secret_key(secp, &funding.local_funding_key);
    let local_first = local_pubkey.serialize() < funding.remote_funding_pubkey.serialize();
    let (first, second) = if local_first {
        (local_signature, remote_signature)
    } else {
        (remote_signature, local_signature)
    };

    Witness::from_slice(&[
        &[][..], // OP_0 for the CHECKMULTISIG bug
        first,
        second,
        funding.redeem_script.as_bytes(),
    ])
}
