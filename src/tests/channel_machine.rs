use bitcoin::consensus::encode;
use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{PublicKey, Secp256k1};
use bitcoin::{OutPoint, Transaction};

use crate::channel::spawn_channel_actor;
use crate::error::ChannelError;
use crate::keys::commitment::{derive_commitment_secret, derive_public_key};
use crate::keys::signer::ChannelSigner;
use crate::scripts::{
    create_offered_htlc_script, create_script_pubkey, create_to_local_script, ScriptPubkeyKind,
};
use crate::transactions::htlc::{
    create_offered_preimage_witness, create_to_local_spend_tx, create_to_local_spend_witness,
};
use crate::types::HtlcDirection;
use crate::INITIAL_COMMITMENT_INDEX;

use super::{test_channel_keys, test_channel_pair, test_funding_txid};

#[test]
fn balance_is_conserved_over_htlc_lifecycle() {
    let (mut channel, _) = test_channel_pair();
    let capacity = channel.capacity_msat();
    assert_eq!(channel.local_msat, 700_000_000);
    assert_eq!(channel.remote_msat, 300_000_000);

    let preimage_a = [0x09; 32];
    let hash_a = Sha256::hash(&preimage_a).to_byte_array();
    let preimage_b = [0x0a; 32];
    let hash_b = Sha256::hash(&preimage_b).to_byte_array();

    let offered = channel
        .add_htlc(HtlcDirection::Offered, 50_000_000, hash_a, 500)
        .unwrap();
    assert_eq!(channel.local_msat, 650_000_000);

    let received = channel
        .add_htlc(HtlcDirection::Received, 10_000_000, hash_b, 501)
        .unwrap();
    assert_eq!(channel.remote_msat, 290_000_000);
    assert_eq!(
        channel.local_msat + channel.remote_msat + channel.pending_htlc_msat(),
        capacity
    );

    // Wrong preimage never settles.
    assert_eq!(
        channel.fulfill_htlc(offered, preimage_b),
        Err(ChannelError::PreimageMismatch)
    );

    channel.fulfill_htlc(offered, preimage_a).unwrap();
    assert_eq!(channel.remote_msat, 340_000_000);

    channel.fail_htlc(received).unwrap();
    assert_eq!(channel.remote_msat, 350_000_000);
    assert_eq!(channel.local_msat, 650_000_000);
    assert_eq!(channel.pending_htlc_msat(), 0);
    assert_eq!(channel.htlc_count(), 0);

    assert_eq!(
        channel.fail_htlc(offered),
        Err(ChannelError::UnknownHtlc(offered))
    );

    // Overdraw is refused outright.
    let err = channel
        .add_htlc(HtlcDirection::Offered, capacity + 1, hash_a, 502)
        .unwrap_err();
    assert!(matches!(err, ChannelError::InsufficientFunds { .. }));
}

#[tokio::test]
async fn commitment_round_exchanges_revocation() {
    let (channel_a, mut channel_b) = test_channel_pair();
    let (keys_a, _) = test_channel_keys(0xa1);
    let (keys_b, _) = test_channel_keys(0xb2);
    let signer_a = ChannelSigner::new(keys_a);
    let signer_b = ChannelSigner::new(keys_b);
    let a_seed = signer_a.keys.commitment_seed;

    // B learns the point A will use for its next commitment.
    channel_b.remote_per_commitment_point =
        Some(signer_a.point_at(INITIAL_COMMITMENT_INDEX - 1).unwrap());

    let handle_a = spawn_channel_actor(channel_a, signer_a);
    let handle_b = spawn_channel_actor(channel_b, signer_b);

    // B signs A's next commitment; A verifies and reveals the old secret.
    let signature = handle_b.sign_remote_commitment().await.unwrap();
    let revocation = handle_a.commitment_signed(signature).await.unwrap();
    assert_eq!(
        revocation.revoked_secret,
        derive_commitment_secret(&a_seed, INITIAL_COMMITMENT_INDEX)
    );

    // B archives the revealed secret and stores A's next point.
    handle_b
        .provide_revocation(revocation.revoked_secret, revocation.next_per_commitment_point)
        .await
        .unwrap();

    let snapshot_a = handle_a.snapshot().await.unwrap();
    assert_eq!(snapshot_a.local_commit_index, 1);
    let snapshot_b = handle_b.snapshot().await.unwrap();
    assert_eq!(snapshot_b.remote_commit_index, 1);

    // The stored counterparty signature completes the local commitment.
    let hex_tx = handle_a.commit_tx().await.unwrap();
    let tx: Transaction = encode::deserialize(&hex::decode(hex_tx).unwrap()).unwrap();
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.input[0].witness.len(), 4);
    assert_eq!(tx.output.len(), 2);
}

#[tokio::test]
async fn corrupted_revocation_secret_is_fatal() {
    let (channel_a, mut channel_b) = test_channel_pair();
    let (keys_a, _) = test_channel_keys(0xa1);
    let (keys_b, _) = test_channel_keys(0xb2);
    let signer_a = ChannelSigner::new(keys_a);
    let signer_b = ChannelSigner::new(keys_b);

    channel_b.remote_per_commitment_point =
        Some(signer_a.point_at(INITIAL_COMMITMENT_INDEX - 1).unwrap());

    let handle_a = spawn_channel_actor(channel_a, signer_a);
    let handle_b = spawn_channel_actor(channel_b, signer_b);

    let signature = handle_b.sign_remote_commitment().await.unwrap();
    let revocation = handle_a.commitment_signed(signature).await.unwrap();

    // Flipping a bit breaks the ladder only on a later insert; the first
    // revealed secret has no stored descendant, so corrupt the follow-up
    // round instead.
    handle_b
        .provide_revocation(revocation.revoked_secret, revocation.next_per_commitment_point)
        .await
        .unwrap();

    let signature = handle_b.sign_remote_commitment().await.unwrap();
    let revocation = handle_a.commitment_signed(signature).await.unwrap();
    let mut corrupted = revocation.revoked_secret;
    corrupted[4] ^= 0x10;

    let err = handle_b
        .provide_revocation(corrupted, revocation.next_per_commitment_point)
        .await
        .unwrap_err();
    assert_eq!(err, ChannelError::RevocationInconsistent);

    // The violation closed the channel for further updates.
    let err = handle_b
        .add_htlc(HtlcDirection::Offered, 1_000_000, [0x55; 32], 500)
        .await
        .unwrap_err();
    assert_eq!(err, ChannelError::Closed);
}

#[tokio::test]
async fn invalid_commitment_signature_is_fatal() {
    let (channel_a, _) = test_channel_pair();
    let (keys_a, _) = test_channel_keys(0xa1);
    let handle_a = spawn_channel_actor(channel_a, ChannelSigner::new(keys_a));

    let err = handle_a
        .commitment_signed(vec![0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x01, 0x01])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ChannelError::InvalidSignature | ChannelError::SignatureMismatch
    ));

    // Fatal: the channel refuses further updates.
    let err = handle_a
        .add_htlc(HtlcDirection::Offered, 1_000_000, [0x55; 32], 500)
        .await
        .unwrap_err();
    assert_eq!(err, ChannelError::Closed);
}

#[tokio::test]
async fn cooperative_close_requires_no_pending_htlcs() {
    let (channel_a, _) = test_channel_pair();
    let (keys_a, _) = test_channel_keys(0xa1);
    let handle = spawn_channel_actor(channel_a, ChannelSigner::new(keys_a));

    handle
        .add_htlc(HtlcDirection::Offered, 5_000_000, [0x66; 32], 500)
        .await
        .unwrap();
    assert_eq!(
        handle.close(false).await.unwrap_err(),
        ChannelError::HtlcsPending
    );

    handle.fail_htlc(0).await.unwrap();
    handle.close(false).await.unwrap();

    // A closing channel accepts no new HTLCs.
    assert_eq!(
        handle
            .add_htlc(HtlcDirection::Offered, 1_000, [0x67; 32], 500)
            .await
            .unwrap_err(),
        ChannelError::Closed
    );
}

#[test]
fn signer_htlc_keys_claim_an_offered_output() {
    let secp = Secp256k1::new();
    let (keys, public) = test_channel_keys(0x31);
    let signer = ChannelSigner::new(keys);
    let per_commitment_point = signer.per_commitment_point();

    // The derived private keys pair up with the derived public keys.
    let htlc_priv = signer.htlc_privkey(&per_commitment_point);
    let htlc_pub = derive_public_key(&public.htlc_basepoint, &per_commitment_point, &secp);
    assert_eq!(PublicKey::from_secret_key(&secp, &htlc_priv), htlc_pub);

    let delayed_priv = signer.delayed_payment_privkey(&per_commitment_point);
    let delayed_pub = derive_public_key(
        &public.delayed_payment_basepoint,
        &per_commitment_point,
        &secp,
    );
    assert_eq!(PublicKey::from_secret_key(&secp, &delayed_priv), delayed_pub);

    // Claim a counterparty's offered HTLC output directly with the preimage.
    let preimage = [0x5c; 32];
    let payment_hash = Sha256::hash(&preimage).to_byte_array();
    let script = create_offered_htlc_script(&delayed_pub, &htlc_pub, &htlc_pub, &payment_hash);
    let destination = create_script_pubkey(&htlc_pub.serialize(), ScriptPubkeyKind::P2wpkh);
    let mut tx = create_to_local_spend_tx(OutPoint::new(test_funding_txid(), 0), 5_000, destination, 0);

    let signature = signer.sign_transaction_input(&tx, 0, &script, 6_000, &htlc_priv);
    signer
        .verify_signature(&tx, 0, &script, 6_000, &signature, &htlc_pub)
        .unwrap();

    tx.input[0].witness = create_offered_preimage_witness(signature, preimage, &script);
    let items: Vec<&[u8]> = tx.input[0].witness.iter().collect();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1], &preimage[..]);
    assert_eq!(items[2], script.as_bytes());
}

#[test]
fn to_local_spend_sequences_and_witnesses() {
    let secp = Secp256k1::new();
    let key = bitcoin::secp256k1::SecretKey::from_slice(&[0x21; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(&secp, &key);
    let script = create_to_local_script(&pubkey, &pubkey, 144);
    let destination = create_script_pubkey(&pubkey.serialize(), ScriptPubkeyKind::P2wpkh);
    let outpoint = OutPoint::new(test_funding_txid(), 1);

    // Normal path waits out the delay via nSequence.
    let tx = create_to_local_spend_tx(outpoint, 9_000, destination.clone(), 144);
    assert_eq!(tx.input[0].sequence.to_consensus_u32(), 144);
    assert_eq!(tx.lock_time.to_consensus_u32(), 0);

    let delayed = create_to_local_spend_witness(vec![0xaa; 71], false, &script);
    let items: Vec<&[u8]> = delayed.iter().collect();
    assert_eq!(items.len(), 3);
    assert!(items[1].is_empty());

    // Penalty path selects the revocation branch.
    let penalty = create_to_local_spend_witness(vec![0xaa; 71], true, &script);
    let items: Vec<&[u8]> = penalty.iter().collect();
    assert_eq!(items[1], &[0x01u8][..]);
    assert_eq!(items[2], script.as_bytes());
}
