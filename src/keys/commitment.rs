use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::{Hash, HashEngine};
use bitcoin::secp256k1::{All, PublicKey, Scalar, Secp256k1, SecretKey};

use crate::types::CommitmentKeys;

// PER-COMMITMENT SECRET GENERATION
// ============================================================================

/// Derive a secret from `base` by flipping each set bit of `index` below
/// `bits` (highest first) and hashing. With `bits = 48` and the channel seed
/// as base this is the per-commitment secret; with fewer bits it walks from
/// one stored secret down to a descendant.
pub(crate) fn derive_secret_bits(base: &[u8; 32], bits: u8, index: u64) -> [u8; 32] {
    let mut p = *base;
    for i in 0..bits {
        let bit_position = (bits - 1 - i) as u64;
        if index & (1 << bit_position) == (1 << bit_position) {
            p[(bit_position / 8) as usize] ^= 1 << (bit_position & 7);
            p = Sha256::hash(&p).to_byte_array();
        }
    }
    p
}

/// Per-commitment secret for a 48-bit storage index.
pub fn derive_commitment_secret(seed: &[u8; 32], index: u64) -> [u8; 32] {
    derive_secret_bits(seed, 48, index)
}

/// The per-commitment point: the secret interpreted as a scalar times G.
pub fn commitment_point(
    seed: &[u8; 32],
    index: u64,
    secp_ctx: &Secp256k1<All>,
) -> PublicKey {
    let secret = derive_commitment_secret(seed, index);
    let secret_key = SecretKey::from_slice(&secret)
        .expect("Hashes should always be valid keys unless SHA-256 is broken");
    PublicKey::from_secret_key(secp_ctx, &secret_key)
}

// PER-COMMITMENT KEY DERIVATION
// ============================================================================

/// Derive public key from basepoint and per-commitment point.
pub fn derive_public_key(
    basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> PublicKey {
    // pubkey = basepoint + SHA256(per_commitment_point || basepoint)
    let mut engine = Sha256::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let res = Sha256::from_engine(engine);

    let hashkey = PublicKey::from_secret_key(
        secp_ctx,
        &SecretKey::from_slice(res.as_byte_array())
            .expect("Hashes should always be valid keys unless SHA-256 is broken"),
    );

    basepoint.combine(&hashkey).expect("Addition only fails if the tweak is the inverse of the key. This is not possible when the tweak contains the hash of the key.")
}

/// Derive private key from base secret and per-commitment point.
pub fn derive_private_key(
    base_secret: &SecretKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> SecretKey {
    // privkey = base_secret + SHA256(per_commitment_point || basepoint)
    let basepoint = PublicKey::from_secret_key(secp_ctx, base_secret);

    let mut engine = Sha256::engine();
    engine.input(&per_commitment_point.serialize());
    engine.input(&basepoint.serialize());
    let res = Sha256::from_engine(engine).to_byte_array();

    base_secret.clone().add_tweak(&Scalar::from_be_bytes(res).expect("hash outputs are valid scalars"))
        .expect("Addition only fails if the tweak is the inverse of the key. This is not possible when the tweak contains the hash of the key.")
}

// REVOCATION KEY DERIVATION
// ============================================================================
// The revocation key blinds both parties: neither can compute the private
// key until the per-commitment secret is disclosed.

/// Derive revocation public key.
pub fn derive_revocation_public_key(
    revocation_basepoint: &PublicKey,
    per_commitment_point: &PublicKey,
    secp_ctx: &Secp256k1<All>,
) -> PublicKey {
    // revocationpubkey = revocation_basepoint * SHA256(revocation_basepoint || per_commitment_point) +
    //                    per_commitment_point * SHA256(per_commitment_point || revocation_basepoint)
    let mut engine1 = Sha256::engine();
    engine1.input(&revocation_basepoint.serialize());
    engine1.input(&per_commitment_point.serialize());
    let hash1 = Sha256::from_engine(engine1).to_byte_array();
    let scalar1 = Scalar::from_be_bytes(hash1).expect("hash outputs are valid scalars");
    let component1 = revocation_basepoint
        .mul_tweak(secp_ctx, &scalar1)
        .expect("valid tweak");

    let mut engine2 = Sha256::engine();
    engine2.input(&per_commitment_point.serialize());
    engine2.input(&revocation_basepoint.serialize());
    let hash2 = Sha256::from_engine(engine2).to_byte_array();
    let scalar2 = Scalar::from_be_bytes(hash2).expect("hash outputs are valid scalars");
    let component2 = per_commitment_point
        .mul_tweak(secp_ctx, &scalar2)
        .expect("valid tweak");

    component1.combine(&component2).expect("valid combination")
}

/// Derive revocation private key. Only possible once the counterparty has
/// revealed the per-commitment secret.
pub fn derive_revocation_private_key(
    revocation_basepoint_secret: &SecretKey,
    per_commitment_secret: &SecretKey,
    secp_ctx: &Secp256k1<All>,
) -> SecretKey {
    let revocation_basepoint = PublicKey::from_secret_key(secp_ctx, revocation_basepoint_secret);
    let per_commitment_point = PublicKey::from_secret_key(secp_ctx, per_commitment_secret);

    let mut engine1 = Sha256::engine();
    engine1.input(&revocation_basepoint.serialize());
    engine1.input(&per_commitment_point.serialize());
    let hash1 = Sha256::from_engine(engine1).to_byte_array();
    let scalar1 = Scalar::from_be_bytes(hash1).expect("hash outputs are valid scalars");
    let key1 = revocation_basepoint_secret
        .mul_tweak(&scalar1)
        .expect("valid tweak");

    let mut engine2 = Sha256::engine();
    engine2.input(&per_commitment_point.serialize());
    engine2.input(&revocation_basepoint.serialize());
    let hash2 = Sha256::from_engine(engine2).to_byte_array();
    let scalar2 = Scalar::from_be_bytes(hash2).expect("hash outputs are valid scalars");
    let key2 = per_commitment_secret
        .mul_tweak(&scalar2)
        .expect("valid tweak");

    let scalar_key2 = Scalar::from_be_bytes(key2.secret_bytes()).expect("keys are valid scalars");
    key1.add_tweak(&scalar_key2).expect("valid addition")
}

impl CommitmentKeys {
    /// Derive all keys for one commitment from the channel basepoints and
    /// the per-commitment point.
    pub fn from_basepoints(
        per_commitment_point: &PublicKey,
        local_delayed_payment_basepoint: &PublicKey,
        local_htlc_basepoint: &PublicKey,
        remote_revocation_basepoint: &PublicKey,
        remote_htlc_basepoint: &PublicKey,
        remote_payment_basepoint: &PublicKey,
        secp_ctx: &Secp256k1<All>,
    ) -> Self {
        let revocation_key = derive_revocation_public_key(
            remote_revocation_basepoint,
            per_commitment_point,
            secp_ctx,
        );

        let local_delayed_payment_key = derive_public_key(
            local_delayed_payment_basepoint,
            per_commitment_point,
            secp_ctx,
        );

        let local_htlc_key =
            derive_public_key(local_htlc_basepoint, per_commitment_point, secp_ctx);

        let remote_htlc_key =
            derive_public_key(remote_htlc_basepoint, per_commitment_point, secp_ctx);

        let to_remote_key =
            derive_public_key(remote_payment_basepoint, per_commitment_point, secp_ctx);

        Self {
            per_commitment_point: *per_commitment_point,
            revocation_key,
            local_htlc_key,
            remote_htlc_key,
            local_delayed_payment_key,
            to_remote_key,
        }
    }

    /// Create keys directly from provided public keys, bypassing derivation.
    pub fn from_keys(
        per_commitment_point: PublicKey,
        revocation_key: PublicKey,
        local_delayed_payment_key: PublicKey,
        local_htlc_key: PublicKey,
        remote_htlc_key: PublicKey,
        to_remote_key: PublicKey,
    ) -> Self {
        Self {
            per_commitment_point,
            revocation_key,
            local_htlc_key,
            remote_htlc_key,
            local_delayed_payment_key,
            to_remote_key,
        }
    }
}
