use bitcoin::blockdata::opcodes::all as opcodes;
use bitcoin::hashes::hash160::Hash as Hash160;
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, Script, ScriptBuf};
use bitcoin::secp256k1::PublicKey;

/// Create to_remote script (P2WPKH)
/// This output goes to the counterparty and is immediately spendable by them
pub fn create_to_remote_script(remote_pubkey: &PublicKey) -> ScriptBuf {
    // P2WPKH format: OP_0 <20-byte-pubkey-hash>
    let pubkey_hash = Hash160::hash(&remote_pubkey.serialize());
    Builder::new()
        .push_int(0)
        .push_slice(pubkey_hash.as_byte_array())
        .into_script()
}

/// Create to_local script (revocable with delay)
/// This output goes to us but has a time delay and can be revoked by counterparty
pub fn create_to_local_script(
    revocation_pubkey: &PublicKey,
    local_delayedpubkey: &PublicKey,
    to_self_delay: u16,
) -> ScriptBuf {
    Builder::new()
        .push_opcode(opcodes::OP_IF)
        .push_slice(revocation_pubkey.serialize())
        .push_opcode(opcodes::OP_ELSE)
        .push_int(to_self_delay as i64)
        .push_opcode(opcodes::OP_CSV)
        .push_opcode(opcodes::OP_DROP)
        .push_slice(local_delayedpubkey.serialize())
        .push_opcode(opcodes::OP_ENDIF)
        .push_opcode(opcodes::OP_CHECKSIG)
        .into_script()
}

// GENERIC SCRIPT-PUBKEY HELPERS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptPubkeyKind {
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
}

/// Build a script pubkey of the given kind around `payload` (a serialized
/// public key for the key-hash kinds, a redeem/witness script otherwise).
pub fn create_script_pubkey(payload: &[u8], kind: ScriptPubkeyKind) -> ScriptBuf {
    match kind {
        ScriptPubkeyKind::P2pkh => {
            let hash = Hash160::hash(payload);
            Builder::new()
                .push_opcode(opcodes::OP_DUP)
                .push_opcode(opcodes::OP_HASH160)
                .push_slice(hash.as_byte_array())
                .push_opcode(opcodes::OP_EQUALVERIFY)
                .push_opcode(opcodes::OP_CHECKSIG)
                .into_script()
        }
        ScriptPubkeyKind::P2sh => {
            let hash = Hash160::hash(payload);
            Builder::new()
                .push_opcode(opcodes::OP_HASH160)
                .push_slice(hash.as_byte_array())
                .push_opcode(opcodes::OP_EQUAL)
                .into_script()
        }
        ScriptPubkeyKind::P2wpkh => {
            let hash = Hash160::hash(payload);
            Builder::new()
                .push_int(0)
                .push_slice(hash.as_byte_array())
                .into_script()
        }
        ScriptPubkeyKind::P2wsh => {
            let hash = Sha256::hash(payload);
            Builder::new()
                .push_int(0)
                .push_slice(hash.as_byte_array())
                .into_script()
        }
    }
}

/// Recognize the four standard script-pubkey shapes by length and fixed
/// opcode positions: P2PKH(25), P2SH(23), P2WPKH(22), P2WSH(34).
pub fn is_standard_script_pubkey(spk: &Script) -> bool {
    let p = spk.as_bytes();
    match p.len() {
        25 => {
            // OP_DUP OP_HASH160 20 [20-bytes] OP_EQUALVERIFY OP_CHECKSIG
            p[0] == opcodes::OP_DUP.to_u8()
                && p[1] == opcodes::OP_HASH160.to_u8()
                && p[2] == 20
                && p[23] == opcodes::OP_EQUALVERIFY.to_u8()
                && p[24] == opcodes::OP_CHECKSIG.to_u8()
        }
        23 => {
            // OP_HASH160 20 [20-bytes] OP_EQUAL
            p[0] == opcodes::OP_HASH160.to_u8() && p[1] == 20 && p[22] == opcodes::OP_EQUAL.to_u8()
        }
        22 => {
            // OP_0 20 [20-bytes]
            p[0] == opcodes::OP_PUSHBYTES_0.to_u8() && p[1] == 20
        }
        34 => {
            // OP_0 32 [32-bytes]
            p[0] == opcodes::OP_PUSHBYTES_0.to_u8() && p[1] == 32
        }
        _ => false,
    }
}
