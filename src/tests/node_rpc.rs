use std::sync::Arc;
use std::time::Duration;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde_json::{json, Value};

use crate::chain::StaticChain;
use crate::channel::spawn_channel_actor;
use crate::error::RpcErrorCode;
use crate::keys::signer::ChannelSigner;
use crate::node::{ChannelEntry, ChannelState, Node, NodeConfig};
use crate::payment::{ChannelEdge, GraphRouter, HrpInvoiceEncoder};
use crate::peer::{MemoryPeerTransport, PeerAddr, PeerTransport};
use crate::rpc::dispatch;
use crate::store::{preimage_hash, MemoryStore, PreimageStore, SkipStore, InvoiceStore};
use crate::types::ShortChannelId;
use crate::Network;

use super::{test_channel_keys, test_channel_pair};

type TestNode = (
    Arc<Node>,
    Arc<MemoryStore>,
    Arc<MemoryPeerTransport>,
    Arc<GraphRouter>,
    Arc<StaticChain>,
);

fn test_node() -> TestNode {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MemoryPeerTransport::new());
    let router = Arc::new(GraphRouter::new());
    let chain = Arc::new(StaticChain::new(500_000));
    let node = Node::new(
        [0x77; 32],
        NodeConfig {
            network: Network::Regtest,
            p2p_port: 9735,
            rpc_port: 9736,
        },
        store.clone(),
        chain.clone(),
        router.clone(),
        transport.clone(),
        Arc::new(HrpInvoiceEncoder),
    );
    (node, store, transport, router, chain)
}

fn peer_pubkey(byte: u8) -> PublicKey {
    let secp = Secp256k1::new();
    PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
}

fn peer_addr(byte: u8) -> PeerAddr {
    PeerAddr {
        node_id: peer_pubkey(byte),
        ip: "127.0.0.1".to_string(),
        port: 10_000 + byte as u16,
    }
}

fn peer_params(addr: &PeerAddr) -> Value {
    json!([addr.node_id.to_string(), addr.ip.clone(), addr.port])
}

fn edge(from: PublicKey, to: PublicKey, scid: ShortChannelId) -> ChannelEdge {
    ChannelEdge {
        from,
        to,
        short_channel_id: scid,
        fee_base_msat: 0,
        fee_proportional_millionths: 0,
        cltv_expiry_delta: 6,
        capacity_msat: 10_000_000_000,
    }
}

/// Spawn a live channel actor with peer `addr` and register it.
fn register_live_channel(node: &Arc<Node>, addr: &PeerAddr, scid: ShortChannelId) {
    let (channel, _) = test_channel_pair();
    let (keys, _) = test_channel_keys(0xa1);
    let handle = spawn_channel_actor(channel, ChannelSigner::new(keys));
    node.register_channel(ChannelEntry {
        node_id: addr.node_id,
        addr: addr.clone(),
        channel_id: handle.channel_id,
        short_channel_id: Some(scid),
        handle: Some(handle),
        state: ChannelState::Open,
    });
}

#[tokio::test]
async fn connect_and_disconnect() {
    let (node, _, _, _, _) = test_node();
    let addr = peer_addr(0x05);
    let params = peer_params(&addr);

    assert_eq!(dispatch(&node, "connect", &params).await.unwrap(), json!("OK"));
    assert_eq!(
        dispatch(&node, "connect", &params).await.unwrap_err().code,
        RpcErrorCode::AlreadyConnected.code()
    );

    assert_eq!(
        dispatch(&node, "disconnect", &params).await.unwrap(),
        json!("OK")
    );
    assert_eq!(
        dispatch(&node, "disconnect", &params).await.unwrap_err().code,
        RpcErrorCode::NotConnected.code()
    );

    // Connecting to our own node id is a parameter fault.
    let own = json!([node.node_id.to_string(), "127.0.0.1", 9999]);
    assert_eq!(
        dispatch(&node, "connect", &own).await.unwrap_err().code,
        RpcErrorCode::Parse.code()
    );
}

#[tokio::test]
async fn invoice_round_trip() {
    let (node, store, _, _, _) = test_node();

    let created = dispatch(&node, "invoice", &json!([100_000])).await.unwrap();
    let hash_hex = created["hash"].as_str().unwrap().to_string();
    assert_eq!(created["amount"], json!(100_000));
    assert!(created["bolt11"].as_str().unwrap().starts_with("lnbcrt"));

    // The listed hash is SHA-256 of the stored preimage.
    let mut hash = [0u8; 32];
    hex::decode_to_slice(&hash_hex, &mut hash).unwrap();
    let entry = store.preimage_load(&hash).unwrap();
    assert_eq!(preimage_hash(&entry.preimage), hash);
    assert_eq!(entry.amount_msat, 100_000);

    let listed = dispatch(&node, "listinvoice", &json!([])).await.unwrap();
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0][0], json!(hash_hex.clone()));
    assert_eq!(listed[0][1], json!(100_000));

    assert_eq!(
        dispatch(&node, "eraseinvoice", &json!([hash_hex])).await.unwrap(),
        json!("OK")
    );
    let listed = dispatch(&node, "listinvoice", &json!([])).await.unwrap();
    assert!(listed.as_array().unwrap().is_empty());

    // Deleting an unknown hash reports the erase failure.
    assert_eq!(
        dispatch(&node, "eraseinvoice", &json!([hex::encode([9u8; 32])]))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::InvoiceErase.code()
    );

    // An empty hash erases everything.
    dispatch(&node, "invoice", &json!([1_000])).await.unwrap();
    dispatch(&node, "invoice", &json!([2_000])).await.unwrap();
    assert_eq!(
        dispatch(&node, "eraseinvoice", &json!([""])).await.unwrap(),
        json!("OK")
    );
    assert!(store.preimage_iterate().is_empty());
}

#[tokio::test]
async fn routing_retry_excludes_failing_first_hop() {
    let (node, store, transport, router, _) = test_node();
    let peer_b = peer_addr(0x0b);
    let payee = peer_pubkey(0x0c);
    transport.add_peer(peer_b.clone(), true);

    let scid_ab = ShortChannelId(0xaabb);
    router.add_edge(edge(node.node_id, peer_b.node_id, scid_ab));
    router.add_edge(edge(peer_b.node_id, payee, ShortChannelId(0xbbcc)));

    // No channel with the first-hop peer: submission fails after the
    // invoice snapshot is saved.
    let payment_hash = [0x21; 32];
    let params = json!([hex::encode(payment_hash), 123_000u64, payee.to_string(), "", 9, 0]);
    let result = dispatch(&node, "routepay", &params).await.unwrap();
    assert_eq!(result, json!("start payment"));

    // The failing first hop is excluded and a retry owns the invoice.
    assert!(store.skip_temporary().contains(&scid_ab));
    assert!(store.invoice_load(&payment_hash).is_some());

    // The queued retry reruns the oracle with the edge excluded, finds no
    // other route and fails terminally.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(node.last_pay_err.lock().unwrap().is_some());
    assert!(store.invoice_load(&payment_hash).is_none());
    assert!(store.skip_temporary().is_empty());
}

#[tokio::test]
async fn routepay_clears_stale_skips_and_submits() {
    let (node, store, transport, router, _) = test_node();
    let peer_b = peer_addr(0x0b);
    let payee = peer_pubkey(0x0c);
    transport.add_peer(peer_b.clone(), true);

    let scid_ab = ShortChannelId(0xaabb);
    router.add_edge(edge(node.node_id, peer_b.node_id, scid_ab));
    router.add_edge(edge(peer_b.node_id, payee, ShortChannelId(0xbbcc)));
    register_live_channel(&node, &peer_b, scid_ab);

    // Leftover exclusion from an earlier payment attempt.
    store.skip_save(ShortChannelId(0x9999), true);

    let payment_hash = [0x22; 32];
    let params = json!([hex::encode(payment_hash), 123_000u64, payee.to_string(), "", 9, 0]);
    let result = dispatch(&node, "routepay", &params).await.unwrap();
    assert_eq!(result, json!("start payment"));

    // First call dropped the temporary set; the submission succeeded so no
    // new exclusion appeared and the invoice stays in flight.
    assert!(store.skip_temporary().is_empty());
    assert!(store.invoice_load(&payment_hash).is_some());

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, peer_b.node_id);
    let payload: Value = serde_json::from_slice(&sent[0].1).unwrap();
    assert_eq!(payload["type"], json!("update_add_htlc"));
    assert_eq!(payload["amount_msat"], json!(123_000));
    assert_eq!(payload["payment_hash"], json!(hex::encode(payment_hash)));
}

#[tokio::test]
async fn routepay_reports_oracle_outcomes() {
    let (node, _, _, _, _) = test_node();
    let payee = peer_pubkey(0x0c);

    // Empty graph: nothing to route over.
    let params = json!([hex::encode([0x23; 32]), 1_000u64, payee.to_string(), "", 9, 0]);
    assert_eq!(
        dispatch(&node, "routepay", &params).await.unwrap_err().code,
        RpcErrorCode::RouteNotFound.code()
    );
    assert!(node.last_pay_err.lock().unwrap().is_some());
}

#[tokio::test]
async fn pay_follows_explicit_route() {
    let (node, store, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);
    transport.add_peer(peer_b.clone(), true);
    let scid_ab = ShortChannelId(0xaabb);
    register_live_channel(&node, &peer_b, scid_ab);

    let payment_hash = [0x24; 32];
    let params = json!([
        hex::encode(payment_hash),
        2,
        [
            [node.node_id.to_string(), "000000000000aabb", 50_000u64, 40],
            [peer_b.node_id.to_string(), "0", 50_000u64, 40],
        ]
    ]);
    let result = dispatch(&node, "PAY", &params).await.unwrap();
    assert_eq!(result, json!("Progressing"));

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let payload: Value = serde_json::from_slice(&sent[0].1).unwrap();
    // CLTV deltas are absolute once the block height is added.
    assert_eq!(payload["cltv_expiry"], json!(500_040));
    drop(sent);

    // Unconnected peer: the error surfaces and transient state is cleared.
    transport.disconnect(&peer_b.node_id).await.unwrap();
    store.skip_save(ShortChannelId(0x7777), true);
    assert_eq!(
        dispatch(&node, "PAY", &params).await.unwrap_err().code,
        RpcErrorCode::NotConnected.code()
    );
    assert!(store.skip_temporary().is_empty());
}

#[tokio::test]
async fn close_is_unilateral_without_live_connection() {
    let (node, _, _, _, _) = test_node();
    let peer_b = peer_addr(0x0b);

    // Channel record exists, but the peer is unreachable.
    node.register_channel(ChannelEntry {
        node_id: peer_b.node_id,
        addr: peer_b.clone(),
        channel_id: crate::types::ChannelId([0xcd; 32]),
        short_channel_id: None,
        handle: None,
        state: ChannelState::Open,
    });

    let result = dispatch(&node, "close", &peer_params(&peer_b)).await.unwrap();
    assert_eq!(result, json!("unilateral close"));
    assert_eq!(
        node.channel_state(&peer_b.node_id),
        Some(ChannelState::ForceClosed)
    );

    // No channel at all: nothing to close.
    let stranger = peer_addr(0x0d);
    assert_eq!(
        dispatch(&node, "close", &peer_params(&stranger))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::NoChannel.code()
    );
}

#[tokio::test]
async fn close_is_cooperative_on_live_channel() {
    let (node, _, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);
    transport.add_peer(peer_b.clone(), true);
    register_live_channel(&node, &peer_b, ShortChannelId(1));

    let result = dispatch(&node, "close", &peer_params(&peer_b)).await.unwrap();
    assert_eq!(result, json!("Progressing"));
    assert_eq!(
        node.channel_state(&peer_b.node_id),
        Some(ChannelState::Closing)
    );
}

#[tokio::test]
async fn getcommittx_and_getinfo_report_channel_state() {
    let (node, _, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);
    transport.add_peer(peer_b.clone(), true);
    register_live_channel(&node, &peer_b, ShortChannelId(1));

    let committx = dispatch(&node, "getcommittx", &peer_params(&peer_b))
        .await
        .unwrap();
    let hex_tx = committx["committx"].as_str().unwrap();
    let tx: bitcoin::Transaction =
        bitcoin::consensus::encode::deserialize(&hex::decode(hex_tx).unwrap()).unwrap();
    assert_eq!(tx.input.len(), 1);
    assert_eq!(tx.output.len(), 2);

    let info = dispatch(&node, "getinfo", &json!([])).await.unwrap();
    assert_eq!(info["node_id"], json!(node.node_id.to_string()));
    assert_eq!(info["total_our_msat"], json!(700_000_000));
    assert_eq!(info["peers"].as_array().unwrap().len(), 1);
    assert_eq!(info["jsonrpc_port"], json!(9736));

    // Unknown peer: no channel to report.
    let stranger = peer_addr(0x0d);
    assert_eq!(
        dispatch(&node, "getcommittx", &peer_params(&stranger))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::NoChannel.code()
    );
}

#[tokio::test]
async fn getlasterror_reports_stored_peer_error() {
    let (node, _, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);
    transport.add_peer(peer_b.clone(), true);

    // Connected peer without a recorded failure.
    assert_eq!(
        dispatch(&node, "getlasterror", &peer_params(&peer_b)).await.unwrap(),
        Value::Null
    );

    node.set_peer_error(&peer_b.node_id, RpcErrorCode::PayStop.into());
    assert_eq!(
        dispatch(&node, "getlasterror", &peer_params(&peer_b))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::PayStop.code()
    );

    let stranger = peer_addr(0x0d);
    assert_eq!(
        dispatch(&node, "getlasterror", &peer_params(&stranger))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::NotConnected.code()
    );
}

#[tokio::test]
async fn control_toggles() {
    let (node, _, _, _, _) = test_node();

    assert_eq!(
        dispatch(&node, "debug", &json!([5])).await.unwrap(),
        json!("00000005")
    );
    assert_eq!(
        dispatch(&node, "debug", &json!([3])).await.unwrap(),
        json!("00000006")
    );
    assert_eq!(
        dispatch(&node, "debug", &json!(["x"])).await.unwrap(),
        json!("NG")
    );

    assert_eq!(
        dispatch(&node, "disautoconn", &json!(["1"])).await.unwrap(),
        json!("disable auto connect")
    );
    assert_eq!(
        dispatch(&node, "disautoconn", &json!(["0"])).await.unwrap(),
        json!("enable auto connect")
    );
    assert_eq!(
        dispatch(&node, "disautoconn", &json!(["z"])).await.unwrap_err().code,
        RpcErrorCode::Parse.code()
    );

    assert_eq!(
        dispatch(&node, "setfeerate", &json!([1000])).await.unwrap(),
        json!("OK")
    );
    assert_eq!(node.feerate_per_kw(), 1000);
}

#[tokio::test]
async fn removechannel_deletes_the_record() {
    let (node, _, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);
    transport.add_peer(peer_b.clone(), true);
    register_live_channel(&node, &peer_b, ShortChannelId(1));

    let channel_id = node
        .channels
        .lock()
        .unwrap()
        .get(&peer_b.node_id)
        .unwrap()
        .channel_id;

    assert_eq!(
        dispatch(&node, "removechannel", &json!([channel_id.to_string()]))
            .await
            .unwrap(),
        json!("OK")
    );
    assert!(node.channel_state(&peer_b.node_id).is_none());

    assert_eq!(
        dispatch(&node, "removechannel", &json!([hex::encode([1u8; 32])]))
            .await
            .unwrap_err()
            .code,
        RpcErrorCode::Parse.code()
    );
}

#[tokio::test]
async fn stop_signals_every_worker() {
    let (node, _, _, _, _) = test_node();
    assert_eq!(dispatch(&node, "stop", &json!([])).await.unwrap(), json!("OK"));
    assert!(*node.shutdown_signal().borrow());
}

#[tokio::test]
async fn fund_starts_channel_opening() {
    let (node, _, transport, _, _) = test_node();
    let peer_b = peer_addr(0x0b);

    let txid = "8984484a580b825b9972d7adb15050b3ab624ccd731946b3eeddb92f4e7ef6be";
    let fund_params = |addr: &PeerAddr| {
        json!([
            addr.node_id.to_string(),
            addr.ip.clone(),
            addr.port,
            txid,
            0,
            "bcrt1qexample",
            600_000u64,
            0u64,
        ])
    };

    // Not connected yet.
    assert_eq!(
        dispatch(&node, "fund", &fund_params(&peer_b)).await.unwrap_err().code,
        RpcErrorCode::NotConnected.code()
    );

    transport.add_peer(peer_b.clone(), true);
    let result = dispatch(&node, "fund", &fund_params(&peer_b)).await.unwrap();
    assert_eq!(result["status"], json!("Progressing"));
    assert_eq!(
        node.channel_state(&peer_b.node_id),
        Some(ChannelState::Opening)
    );

    // The open request went out with our channel basepoints.
    let sent = transport.sent.lock().unwrap();
    let payload: Value = serde_json::from_slice(&sent[0].1).unwrap();
    assert_eq!(payload["type"], json!("open_channel"));
    assert!(payload["funding_pubkey"].as_str().is_some());
    drop(sent);

    // Funding twice is rejected while the first open is in flight.
    assert_eq!(
        dispatch(&node, "fund", &fund_params(&peer_b)).await.unwrap_err().code,
        RpcErrorCode::Opening.code()
    );
}
