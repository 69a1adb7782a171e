use bitcoin::locktime::absolute::LockTime;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::ChannelError;
use crate::scripts::create_to_local_script;
use crate::transactions::commitment::{sign_p2wsh_input, verify_p2wsh_signature};
use crate::transactions::fees::FeeInfo;
use crate::types::CommitmentKeys;

// HTLC SECOND-STAGE TRANSACTIONS
// ============================================================================

fn htlc_tx(
    htlc_outpoint: OutPoint,
    output_amount_sat: u64,
    lock_time: LockTime,
    keys: &CommitmentKeys,
    to_self_delay: u16,
) -> Transaction {
    // Single output encumbered by the delayed to_local script.
    let to_local_script = create_to_local_script(
        &keys.revocation_key,
        &keys.local_delayed_payment_key,
        to_self_delay,
    );

    Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: htlc_outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(output_amount_sat),
            script_pubkey: to_local_script.to_p2wsh(),
        }],
    }
}

/// HTLC-success transaction (unsigned): claims a received HTLC with the
/// preimage. nLockTime is zero.
pub fn create_htlc_success_tx(
    htlc_outpoint: OutPoint,
    htlc_amount_sat: u64,
    keys: &CommitmentKeys,
    to_self_delay: u16,
    fee: &FeeInfo,
) -> Transaction {
    let output_amount = htlc_amount_sat.saturating_sub(fee.htlc_success_fee);
    htlc_tx(
        htlc_outpoint,
        output_amount,
        LockTime::ZERO,
        keys,
        to_self_delay,
    )
}

/// HTLC-timeout transaction (unsigned): reclaims an offered HTLC after its
/// expiry. nLockTime is the CLTV expiry.
pub fn create_htlc_timeout_tx(
    htlc_outpoint: OutPoint,
    htlc_amount_sat: u64,
    cltv_expiry: u32,
    keys: &CommitmentKeys,
    to_self_delay: u16,
    fee: &FeeInfo,
) -> Transaction {
    let output_amount = htlc_amount_sat.saturating_sub(fee.htlc_timeout_fee);
    htlc_tx(
        htlc_outpoint,
        output_amount,
        LockTime::from_consensus(cltv_expiry),
        keys,
        to_self_delay,
    )
}

/// Sign an HTLC transaction input against the commitment HTLC script.
pub fn sign_htlc_tx(
    tx: &Transaction,
    witness_script: &ScriptBuf,
    htlc_amount_sat: u64,
    htlc_key: &SecretKey,
    secp: &Secp256k1<All>,
) -> Vec<u8> {
    sign_p2wsh_input(tx, 0, witness_script, htlc_amount_sat, htlc_key, secp)
}

/// Verify a counterparty HTLC signature against the expected HTLC key.
pub fn verify_htlc_signature(
    tx: &Transaction,
    witness_script: &ScriptBuf,
    htlc_amount_sat: u64,
    signature: &[u8],
    htlc_pubkey: &PublicKey,
    secp: &Secp256k1<All>,
) -> Result<(), ChannelError> {
    verify_p2wsh_signature(
        tx,
        0,
        witness_script,
        htlc_amount_sat,
        signature,
        htlc_pubkey,
        secp,
    )
}

// HTLC WITNESS CONSTRUCTION
// ============================================================================

/// Witness stack: [0, remote_htlc_sig, local_htlc_sig, payment_preimage, htlc_script]
pub fn create_htlc_success_witness(
    remote_htlc_signature: Vec<u8>,
    local_htlc_signature: Vec<u8>,
    payment_preimage: [u8; 32],
    htlc_script: &ScriptBuf,
) -> Witness {
    Witness::from_slice(&[
        &[][..], // OP_0 for the CHECKMULTISIG bug
        &remote_htlc_signature[..],
        &local_htlc_signature[..],
        &payment_preimage[..],
        htlc_script.as_bytes(),
    ])
}

/// Witness stack: [0, remote_htlc_sig, local_htlc_sig, 0 (false), htlc_script]
pub fn create_htlc_timeout_witness(
    remote_htlc_signature: Vec<u8>,
    local_htlc_signature: Vec<u8>,
    htlc_script: &ScriptBuf,
) -> Witness {
    Witness::from_slice(&[
        &[][..], // OP_0 for the CHECKMULTISIG bug
        &remote_htlc_signature[..],
        &local_htlc_signature[..],
        &[][..], // false selects the timeout branch
        htlc_script.as_bytes(),
    ])
}

/// Direct spend of a counterparty's offered HTLC output with the preimage.
/// Witness stack: [sig, payment_preimage, htlc_script]
pub fn create_offered_preimage_witness(
    signature: Vec<u8>,
    payment_preimage: [u8; 32],
    htlc_script: &ScriptBuf,
) -> Witness {
    Witness::from_slice(&[
        &signature[..],
        &payment_preimage[..],
        htlc_script.as_bytes(),
    ])
}

// SECOND-STAGE TO_LOCAL SPENDS
// ============================================================================

/// Spend of a delayed to_local output, either after `to_self_delay` blocks
/// (sequence = delay) or immediately on the revocation path.
pub fn create_to_local_spend_tx(
    outpoint: OutPoint,
    value_sat: u64,
    destination: ScriptBuf,
    sequence: u32,
) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::from_consensus(sequence),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(value_sat),
            script_pubkey: destination,
        }],
    }
}

/// Witness stack: [sig, 1, script] on the revocation path, [sig, 0, script]
/// on the delayed path.
pub fn create_to_local_spend_witness(
    signature: Vec<u8>,
    revoked: bool,
    witness_script: &ScriptBuf,
) -> Witness {
    let branch: &[u8] = if revoked { &[0x01] } else { &[] };
    Witness::from_slice(&[&signature[..], branch, witness_script.as_bytes()])
}
