use bitcoin::secp256k1::{PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use crate::scripts::{
    create_script_pubkey, is_standard_script_pubkey, payment_hash_image, ScriptPubkeyKind,
};
use crate::transactions::commitment::{
    commitment_obscure_factor, decode_commitment_number, encode_commitment_number,
};
use crate::transactions::fees::{is_htlc_dust, FeeInfo, HTLC_TIMEOUT_WEIGHT};
use crate::types::{CommitmentNumber, HtlcDirection, HtlcInfo};

fn pubkey_from_hex(hex_str: &str) -> PublicKey {
    PublicKey::from_slice(&hex::decode(hex_str).unwrap()).unwrap()
}

#[test]
fn obscure_factor_from_generator_points() {
    // secp256k1 G and 2G as the two payment basepoints.
    let local = pubkey_from_hex(
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    );
    let remote = pubkey_from_hex(
        "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
    );

    let mut hasher = Sha256::new();
    hasher.update(local.serialize());
    hasher.update(remote.serialize());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut expected = 0u64;
    for byte in &digest[26..32] {
        expected = (expected << 8) | *byte as u64;
    }

    let factor = commitment_obscure_factor(&local, &remote);
    assert_eq!(factor, expected);
    assert!(factor < (1 << 48));

    // N = 42 splits across sequence and locktime with the fixed prefixes.
    let number = CommitmentNumber::new(42).unwrap();
    let (sequence, lock_time) = encode_commitment_number(number, factor);
    assert_eq!(sequence.to_consensus_u32() >> 24, 0x80);
    assert_eq!(lock_time.to_consensus_u32() >> 24, 0x20);
    assert_eq!(
        decode_commitment_number(sequence, lock_time, factor),
        Some(number)
    );
}

#[test]
fn obscured_number_round_trips() {
    let factor = 0x2bb038521914u64;
    for value in [
        0u64,
        1,
        42,
        0xffffff,
        0x1000000,
        0x0123456789ab,
        (1 << 48) - 1,
    ] {
        let number = CommitmentNumber::new(value).unwrap();
        let (sequence, lock_time) = encode_commitment_number(number, factor);
        assert_eq!(
            decode_commitment_number(sequence, lock_time, factor),
            Some(number),
            "value {value}"
        );
    }

    // Non-commitment encodings decode to nothing.
    let number = CommitmentNumber::new(7).unwrap();
    let (_, lock_time) = encode_commitment_number(number, factor);
    let plain_sequence = bitcoin::Sequence::from_consensus(0xffff_fffe);
    assert_eq!(decode_commitment_number(plain_sequence, lock_time, factor), None);
}

#[test]
fn commitment_number_is_48_bits() {
    assert!(CommitmentNumber::new((1 << 48) - 1).is_ok());
    assert!(CommitmentNumber::new(1 << 48).is_err());
}

#[test]
fn htlc_below_redemption_cost_is_trimmed() {
    // 1000 msat offered HTLC at feerate 253: timeout fee is 167 sat, so a
    // 1 sat HTLC cannot pay for its own redemption.
    let mut fee = FeeInfo::new(253, 546);
    assert_eq!(fee.htlc_timeout_fee, HTLC_TIMEOUT_WEIGHT * 253 / 1000);
    assert_eq!(fee.htlc_timeout_fee, 167);

    let htlcs = vec![HtlcInfo::new(HtlcDirection::Offered, 1000, 500, [0x44; 32])];
    assert!(fee.is_trimmed(&htlcs[0]));

    let total = fee.calculate(&htlcs);
    assert_eq!(fee.trimmed_dust_sat, 1);
    // Base weight only; the trimmed HTLC adds no weight.
    assert_eq!(fee.commit_fee, 724 * 253 / 1000);
    assert_eq!(total, fee.commit_fee + 1);

    // A 1000 sat HTLC covers the 546 + 167 threshold and survives.
    let big = HtlcInfo::new(HtlcDirection::Offered, 1_000_000, 500, [0x44; 32]);
    assert!(!fee.is_trimmed(&big));
}

#[test]
fn raising_feerate_never_untrims() {
    let amounts_msat = [1_000u64, 500_000, 713_000, 714_000, 1_000_000, 5_000_000];
    let mut feerates: Vec<u64> = (0..200).map(|i| i * 50).collect();
    feerates.push(253);
    feerates.sort_unstable();

    for amount_msat in amounts_msat {
        for direction in [HtlcDirection::Offered, HtlcDirection::Received] {
            let mut was_trimmed = false;
            for feerate in &feerates {
                let trimmed = is_htlc_dust(amount_msat / 1000, 546, *feerate, direction);
                assert!(
                    trimmed || !was_trimmed,
                    "amount {amount_msat} became untrimmed at feerate {feerate}"
                );
                was_trimmed = trimmed;
            }
        }
    }
}

#[test]
fn fee_calculation_counts_surviving_htlcs() {
    let mut fee = FeeInfo::new(1000, 546);
    let htlcs = vec![
        HtlcInfo::new(HtlcDirection::Offered, 5_000_000, 500, [1; 32]),
        HtlcInfo::new(HtlcDirection::Received, 5_000_000, 501, [2; 32]),
        // 1 sat: always dust at this feerate
        HtlcInfo::new(HtlcDirection::Received, 1_000, 502, [3; 32]),
    ];
    fee.calculate(&htlcs);
    assert_eq!(fee.commit_fee, (724 + 2 * 172) * 1000 / 1000);
    assert_eq!(fee.trimmed_dust_sat, 1);
}

#[test]
fn script_pubkey_shapes_are_recognized() {
    let secp = Secp256k1::new();
    let key = bitcoin::secp256k1::SecretKey::from_slice(&[0x33; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(&secp, &key).serialize();
    let witness_script = [0x51u8, 0x52, 0x53]; // arbitrary script bytes

    for kind in [
        ScriptPubkeyKind::P2pkh,
        ScriptPubkeyKind::P2sh,
        ScriptPubkeyKind::P2wpkh,
        ScriptPubkeyKind::P2wsh,
    ] {
        let payload: &[u8] = match kind {
            ScriptPubkeyKind::P2sh | ScriptPubkeyKind::P2wsh => &witness_script,
            _ => &pubkey,
        };
        let spk = create_script_pubkey(payload, kind);
        assert!(
            is_standard_script_pubkey(&spk),
            "{kind:?} should be recognized"
        );
    }

    let bogus = bitcoin::ScriptBuf::from(vec![0x6a, 0x04, 1, 2, 3, 4]);
    assert!(!is_standard_script_pubkey(&bogus));
}

#[test]
fn preimage_image_is_hash160_of_preimage() {
    use bitcoin::hashes::{hash160, Hash};

    let preimage = [0x42u8; 32];
    let payment_hash: [u8; 32] = Sha256::digest(preimage).into();

    let image = payment_hash_image(&payment_hash);
    let hash160 = hash160::Hash::hash(&preimage).to_byte_array();
    assert_eq!(image, hash160);
}
