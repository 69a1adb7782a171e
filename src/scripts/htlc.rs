use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::hashes::ripemd160::Hash as Ripemd160;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, ScriptBuf};
use bitcoin::secp256k1::PublicKey;
use bitcoin::PubkeyHash;

use crate::types::{HtlcDirection, HtlcInfo};

/// 20-byte image embedded in HTLC scripts: RIPEMD160 of the payment hash.
/// Since the payment hash is SHA256(preimage), this equals HASH160(preimage).
pub fn payment_hash_image(payment_hash: &[u8; 32]) -> [u8; 20] {
    Ripemd160::hash(payment_hash).to_byte_array()
}

/// Create offered HTLC script
pub fn create_offered_htlc_script(
    revocation_pubkey: &PublicKey,
    local_htlcpubkey: &PublicKey,
    remote_htlcpubkey: &PublicKey,
    payment_hash: &[u8; 32],
) -> ScriptBuf {
    let payment_hash160 = payment_hash_image(payment_hash);
    let revocation_pubkey_hash = PubkeyHash::hash(&revocation_pubkey.serialize());

    // Three spending paths: revocation, remote with preimage, local via
    // HTLC-timeout (2-of-2).
    //
    // OP_DUP OP_HASH160 <HASH160(revocation_pubkey)> OP_EQUAL
    // OP_IF
    //     OP_CHECKSIG
    // OP_ELSE
    //     <remote_htlcpubkey> OP_SWAP OP_SIZE 32 OP_EQUAL
    //     OP_NOTIF
    //         OP_DROP 2 OP_SWAP <local_htlcpubkey> 2 OP_CHECKMULTISIG
    //     OP_ELSE
    //         OP_HASH160 <RIPEMD160(payment_hash)> OP_EQUALVERIFY
    //         OP_CHECKSIG
    //     OP_ENDIF
    // OP_ENDIF
    Builder::new()
        .push_opcode(opcodes::OP_DUP)
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(&revocation_pubkey_hash)
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_IF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .push_opcode(opcodes::OP_ELSE)
        .push_slice(remote_htlcpubkey.serialize())
        .push_opcode(opcodes::OP_SWAP)
        .push_opcode(opcodes::OP_SIZE)
        .push_int(32)
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_NOTIF)
        .push_opcode(opcodes::OP_DROP)
        .push_int(2)
        .push_opcode(opcodes::OP_SWAP)
        .push_slice(local_htlcpubkey.serialize())
        .push_int(2)
        .push_opcode(opcodes::OP_CHECKMULTISIG)
        .push_opcode(opcodes::OP_ELSE)
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(&payment_hash160)
        .push_opcode(opcodes::OP_EQUALVERIFY)
        .push_opcode(opcodes::OP_CHECKSIG)
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_ENDIF)
        .into_script()
}

/// Create received HTLC script
pub fn create_received_htlc_script(
    revocation_pubkey: &PublicKey,
    local_htlcpubkey: &PublicKey,
    remote_htlcpubkey: &PublicKey,
    payment_hash: &[u8; 32],
    cltv_expiry: u32,
) -> ScriptBuf {
    let payment_hash160 = payment_hash_image(payment_hash);
    let revocation_pubkey_hash = PubkeyHash::hash(&revocation_pubkey.serialize());

    // Symmetric to the offered script, with CLTV on the remote-timeout branch.
    //
    // OP_DUP OP_HASH160 <HASH160(revocation_pubkey)> OP_EQUAL
    // OP_IF
    //     OP_CHECKSIG
    // OP_ELSE
    //     <remote_htlcpubkey> OP_SWAP OP_SIZE 32 OP_EQUAL
    //     OP_IF
    //         OP_HASH160 <RIPEMD160(payment_hash)> OP_EQUALVERIFY
    //         2 OP_SWAP <local_htlcpubkey> 2 OP_CHECKMULTISIG
    //     OP_ELSE
    //         OP_DROP <cltv_expiry> OP_CLTV OP_DROP
    //         OP_CHECKSIG
    //     OP_ENDIF
    // OP_ENDIF
    Builder::new()
        .push_opcode(opcodes::OP_DUP)
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(&revocation_pubkey_hash)
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_IF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .push_opcode(opcodes::OP_ELSE)
        .push_slice(remote_htlcpubkey.serialize())
        .push_opcode(opcodes::OP_SWAP)
        .push_opcode(opcodes::OP_SIZE)
        .push_int(32)
        .push_opcode(opcodes::OP_EQUAL)
        .push_opcode(opcodes::OP_IF)
        .push_opcode(opcodes::OP_HASH160)
        .push_slice(&payment_hash160)
        .push_opcode(opcodes::OP_EQUALVERIFY)
        .push_int(2)
        .push_opcode(opcodes::OP_SWAP)
        .push_slice(local_htlcpubkey.serialize())
        .push_int(2)
        .push_opcode(opcodes::OP_CHECKMULTISIG)
        .push_opcode(opcodes::OP_ELSE)
        .push_opcode(opcodes::OP_DROP)
        .push_int(cltv_expiry as i64)
        .push_opcode(opcodes::OP_CLTV)
        .push_opcode(opcodes::OP_DROP)
        .push_opcode(opcodes::OP_CHECKSIG)
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_ENDIF)
        .into_script()
}

/// Build the witness script for an HTLC and cache it on the entry.
pub fn build_htlc_script(
    htlc: &mut HtlcInfo,
    local_htlc_key: &PublicKey,
    revocation_key: &PublicKey,
    remote_htlc_key: &PublicKey,
) -> ScriptBuf {
    if let Some(script) = &htlc.witness_script {
        return script.clone();
    }
    let script = match htlc.direction {
        HtlcDirection::Offered => create_offered_htlc_script(
            revocation_key,
            local_htlc_key,
            remote_htlc_key,
            &htlc.payment_hash,
        ),
        HtlcDirection::Received => create_received_htlc_script(
            revocation_key,
            local_htlc_key,
            remote_htlc_key,
            &htlc.payment_hash,
            htlc.cltv_expiry,
        ),
    };
    htlc.witness_script = Some(script.clone());
    script
}
