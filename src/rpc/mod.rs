use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitcoin::secp256k1::PublicKey;
use bitcoin::Txid;
use rand::Rng;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcErrorCode};
use crate::node::{ChannelEntry, ChannelState, Node};
use crate::payment::{self, RouteHint, RouteHop, RoutepayRequest, DEFAULT_MIN_FINAL_CLTV_EXPIRY};
use crate::peer::PeerAddr;
use crate::store::{preimage_hash, InvoiceStore, PreimageStore, SkipStore};
use crate::types::{ChannelId, ShortChannelId};

// PARAMETER PARSING
// ============================================================================
// All validation failures surface the single parse error, like the
// original control plane did.

fn parse_err() -> RpcError {
    RpcErrorCode::Parse.into()
}

fn params_array(params: &Value) -> Result<&Vec<Value>, RpcError> {
    params.as_array().ok_or_else(parse_err)
}

fn str_at<'a>(params: &'a [Value], index: usize) -> Result<&'a str, RpcError> {
    params
        .get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(parse_err)
}

fn u64_at(params: &[Value], index: usize) -> Result<u64, RpcError> {
    params
        .get(index)
        .and_then(|v| v.as_u64())
        .ok_or_else(parse_err)
}

fn pubkey_at(params: &[Value], index: usize) -> Result<PublicKey, RpcError> {
    parse_pubkey(str_at(params, index)?)
}

fn parse_pubkey(hex_str: &str) -> Result<PublicKey, RpcError> {
    let bytes = hex::decode(hex_str).map_err(|_| parse_err())?;
    PublicKey::from_slice(&bytes).map_err(|_| parse_err())
}

fn parse_hash32(hex_str: &str) -> Result<[u8; 32], RpcError> {
    let mut hash = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut hash).map_err(|_| parse_err())?;
    Ok(hash)
}

/// Leading [node_id, ip, port] triple shared by the peer-addressed methods.
/// Rejects our own node id.
fn parse_peer(node: &Node, params: &[Value], start: usize) -> Result<PeerAddr, RpcError> {
    let node_id = pubkey_at(params, start)?;
    if node_id == node.node_id {
        debug!("fail: same own node_id");
        return Err(parse_err());
    }
    let ip = str_at(params, start + 1)?.to_string();
    let port = u64_at(params, start + 2)?;
    if port > u16::MAX as u64 {
        return Err(parse_err());
    }
    Ok(PeerAddr {
        node_id,
        ip,
        port: port as u16,
    })
}

/// [hash, amt_msat, payee, payer, min_final_cltv?, r_count?, [r_field...]?]
fn parse_routepay(node: &Node, params: &Value) -> Result<RoutepayRequest, RpcError> {
    let array = params_array(params)?;

    let payment_hash = parse_hash32(str_at(array, 0)?)?;
    let amount_msat = u64_at(array, 1)?;
    let payee = pubkey_at(array, 2)?;
    let payer_str = str_at(array, 3)?;
    let payer = if payer_str.is_empty() {
        node.node_id
    } else {
        parse_pubkey(payer_str)?
    };

    let min_final_cltv_expiry = match array.get(4).and_then(|v| v.as_u64()) {
        Some(v) => v as u32,
        None => DEFAULT_MIN_FINAL_CLTV_EXPIRY,
    };

    let mut hints = Vec::new();
    if let Some(count) = array.get(5).and_then(|v| v.as_u64()) {
        if count > 0 {
            let fields = array.get(6).and_then(|v| v.as_array()).ok_or_else(parse_err)?;
            if fields.len() < count as usize {
                return Err(parse_err());
            }
            for field in fields.iter().take(count as usize) {
                let field = field.as_array().ok_or_else(parse_err)?;
                hints.push(RouteHint {
                    node_id: pubkey_at(field, 0)?,
                    short_channel_id: ShortChannelId(u64_at(field, 1)?),
                    fee_base_msat: u64_at(field, 2)? as u32,
                    fee_proportional_millionths: u64_at(field, 3)? as u32,
                    cltv_expiry_delta: u64_at(field, 4)? as u16,
                });
            }
        }
    }

    Ok(RoutepayRequest {
        payment_hash,
        amount_msat,
        payee,
        payer,
        min_final_cltv_expiry,
        hints,
        raw_params: params.clone(),
    })
}

// DISPATCH
// ============================================================================

pub async fn dispatch(node: &Arc<Node>, method: &str, params: &Value) -> Result<Value, RpcError> {
    match method {
        "connect" => cmd_connect(node, params).await,
        "disconnect" => cmd_disconnect(node, params).await,
        "stop" => cmd_stop(node).await,
        "getinfo" => cmd_getinfo(node).await,
        "fund" => cmd_fund(node, params).await,
        "invoice" => cmd_invoice(node, params).await,
        "eraseinvoice" => cmd_eraseinvoice(node, params).await,
        "listinvoice" => cmd_listinvoice(node).await,
        "PAY" => cmd_pay(node, params).await,
        "routepay" => cmd_routepay(node, params, true).await,
        "routepay_cont" => cmd_routepay(node, params, false).await,
        "close" => cmd_close(node, params).await,
        "getlasterror" => cmd_getlasterror(node, params).await,
        "debug" => cmd_debug(node, params).await,
        "getcommittx" => cmd_getcommittx(node, params).await,
        "disautoconn" => cmd_disautoconn(node, params).await,
        "removechannel" => cmd_removechannel(node, params).await,
        "setfeerate" => cmd_setfeerate(node, params).await,
        _ => Err(RpcError::custom(-32601, "method not found")),
    }
}

async fn cmd_connect(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let addr = parse_peer(node, params_array(params)?, 0)?;
    info!("connect {}", addr.node_id);

    if node.transport.search(&addr.node_id).is_some() {
        return Err(RpcErrorCode::AlreadyConnected.into());
    }
    node.transport
        .connect(&addr)
        .await
        .map_err(|_| RpcError::from(RpcErrorCode::Connect))?;
    if node.transport.search(&addr.node_id).is_none() || !node.transport.is_inited(&addr.node_id) {
        return Err(RpcErrorCode::Connect.into());
    }
    Ok(json!("OK"))
}

async fn cmd_disconnect(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let addr = parse_peer(node, params_array(params)?, 0)?;
    info!("disconnect {}", addr.node_id);

    if node.transport.search(&addr.node_id).is_none() {
        return Err(RpcErrorCode::NotConnected.into());
    }
    // Disconnection cancels the per-peer worker; the channel record stays.
    if let Some(handle) = node.drop_channel_handle(&addr.node_id) {
        handle.stop().await;
    }
    node.transport
        .disconnect(&addr.node_id)
        .await
        .map_err(|_| RpcError::from(RpcErrorCode::Internal))?;
    Ok(json!("OK"))
}

async fn cmd_stop(node: &Arc<Node>) -> Result<Value, RpcError> {
    info!("stop");
    node.stop().await;
    Ok(json!("OK"))
}

async fn cmd_getinfo(node: &Arc<Node>) -> Result<Value, RpcError> {
    let total_msat = node.total_local_msat().await;

    let peers: Vec<Value> = node
        .transport
        .connected_peers()
        .into_iter()
        .map(|peer| {
            json!({
                "node_id": peer.node_id.to_string(),
                "ipaddr": peer.ip,
                "port": peer.port,
                "inited": node.transport.is_inited(&peer.node_id),
            })
        })
        .collect();

    let paying_hash: Vec<String> = node
        .store
        .invoice_hashes()
        .into_iter()
        .map(hex::encode)
        .collect();

    let last_errpay_date = node
        .last_pay_err
        .lock()
        .unwrap()
        .clone()
        .unwrap_or_default();

    Ok(json!({
        "node_id": node.node_id.to_string(),
        "node_port": node.p2p_port,
        "jsonrpc_port": node.rpc_port,
        "total_our_msat": total_msat,
        "peers": peers,
        "paying_hash": paying_hash,
        "last_errpay_date": last_errpay_date,
    }))
}

async fn cmd_fund(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    let addr = parse_peer(node, array, 0)?;

    if node.transport.search(&addr.node_id).is_none() {
        return Err(RpcErrorCode::NotConnected.into());
    }
    match node.channel_state(&addr.node_id) {
        Some(ChannelState::Opening) => return Err(RpcErrorCode::Opening.into()),
        Some(ChannelState::ForceClosed) | None => {}
        Some(_) => return Err(RpcErrorCode::AlreadyOpen.into()),
    }
    if !node.transport.is_inited(&addr.node_id) {
        return Err(RpcErrorCode::NotInitialized.into());
    }

    // txid, vout, signaddr, funding_sat, push_sat, feerate?
    let txid: Txid = str_at(array, 3)?.parse().map_err(|_| parse_err())?;
    let vout = u64_at(array, 4)? as u32;
    let signaddr = str_at(array, 5)?;
    let funding_sat = u64_at(array, 6)?;
    let push_sat = u64_at(array, 7)?;
    let feerate_per_kw = array
        .get(8)
        .and_then(|v| v.as_u64())
        .unwrap_or_else(|| node.feerate_per_kw());

    info!("fund {} sat (push {} sat) via {}", funding_sat, push_sat, signaddr);

    if push_sat > funding_sat {
        return Err(RpcErrorCode::Funding.into());
    }

    // Derive this channel's base keys and ask the peer to open.
    let channel_index = node.next_channel_index.fetch_add(1, Ordering::SeqCst);
    let channel_keys = node.keys.derive_channel_keys(channel_index);
    let public_keys = channel_keys.to_public_keys();

    let open_message = serde_json::to_vec(&json!({
        "type": "open_channel",
        "funding_txid": txid.to_string(),
        "funding_vout": vout,
        "funding_sat": funding_sat,
        "push_msat": push_sat * 1000,
        "feerate_per_kw": feerate_per_kw,
        "funding_pubkey": public_keys.funding_pubkey.to_string(),
        "revocation_basepoint": public_keys.revocation_basepoint.to_string(),
        "payment_basepoint": public_keys.payment_basepoint.to_string(),
        "delayed_payment_basepoint": public_keys.delayed_payment_basepoint.to_string(),
        "htlc_basepoint": public_keys.htlc_basepoint.to_string(),
    }))
    .expect("wire payloads serialize");

    node.transport
        .send(&addr.node_id, open_message)
        .await
        .map_err(|_| RpcError::from(RpcErrorCode::Funding))?;

    node.register_channel(ChannelEntry {
        node_id: addr.node_id,
        addr,
        channel_id: ChannelId::from_funding_outpoint(&txid, vout),
        short_channel_id: None,
        handle: None,
        state: ChannelState::Opening,
    });

    Ok(json!({
        "status": "Progressing",
        "feerate_per_kw": feerate_per_kw,
    }))
}

async fn cmd_invoice(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    let amount_msat = u64_at(array, 0)?;
    info!("invoice {amount_msat} msat");

    let mut preimage = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut preimage);
    node.store.preimage_save(preimage, amount_msat, None);
    let hash = preimage_hash(&preimage);

    let bolt11 = node
        .bolt11
        .encode(&node.genesis, &hash, amount_msat)
        .ok_or_else(parse_err)?;

    Ok(json!({
        "hash": hex::encode(hash),
        "amount": amount_msat,
        "bolt11": bolt11,
    }))
}

async fn cmd_eraseinvoice(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    let hash_str = str_at(array, 0)?;

    let erased = if hash_str.is_empty() {
        node.store.preimage_delete_all()
    } else {
        debug!("erase hash: {hash_str}");
        let hash = parse_hash32(hash_str)?;
        node.store.preimage_delete(&hash)
    };
    if erased {
        Ok(json!("OK"))
    } else {
        Err(RpcErrorCode::InvoiceErase.into())
    }
}

async fn cmd_listinvoice(node: &Arc<Node>) -> Result<Value, RpcError> {
    let entries: Vec<Value> = node
        .store
        .preimage_iterate()
        .into_iter()
        .map(|(hash, entry)| {
            let bolt11 = node.bolt11.encode(&node.genesis, &hash, entry.amount_msat);
            match bolt11 {
                Some(invoice) => json!([hex::encode(hash), entry.amount_msat, invoice]),
                None => json!([hex::encode(hash), entry.amount_msat]),
            }
        })
        .collect();
    Ok(json!(entries))
}

/// Explicit-route payment: [hash, hop_num, [[pubkey, scid_hex, amt_fwd, cltv_delta], ...]]
async fn cmd_pay(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let result = pay_inner(node, params).await;
    if result.is_err() {
        // Drop the in-flight invoice and the temporary exclusions.
        if let Ok(array) = params_array(params) {
            if let Ok(hash_str) = str_at(array, 0) {
                if let Ok(hash) = parse_hash32(hash_str) {
                    node.store.invoice_delete(&hash);
                }
            }
        }
        node.store.skip_drop(true);
    }
    result
}

async fn pay_inner(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;

    let block_count = node
        .chain
        .get_block_count()
        .await
        .map_err(|_| parse_err())?;

    let payment_hash = parse_hash32(str_at(array, 0)?)?;
    let hop_num = u64_at(array, 1)? as usize;
    let hops_json = array.get(2).and_then(|v| v.as_array()).ok_or_else(parse_err)?;
    if hop_num < 2 || hops_json.len() < hop_num {
        return Err(parse_err());
    }

    let mut hops = Vec::with_capacity(hop_num);
    for hop in hops_json.iter().take(hop_num) {
        let hop = hop.as_array().ok_or_else(parse_err)?;
        let scid = ShortChannelId::from_hex(str_at(hop, 1)?).ok_or_else(parse_err)?;
        hops.push(RouteHop {
            node_id: pubkey_at(hop, 0)?,
            short_channel_id: scid,
            amt_to_forward_msat: u64_at(hop, 2)?,
            outgoing_cltv_value: u64_at(hop, 3)? as u32 + block_count as u32,
        });
    }

    info!("payment {}", hex::encode(payment_hash));
    payment::submit_route(node, &hops, &payment_hash).await?;
    Ok(json!("Progressing"))
}

async fn cmd_routepay(node: &Arc<Node>, params: &Value, first: bool) -> Result<Value, RpcError> {
    info!(
        "{}",
        if first { "routepay_first" } else { "routepay" }
    );
    let request = parse_routepay(node, params)?;
    payment::routepay(node, request, first).await
}

async fn cmd_close(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let addr = parse_peer(node, params_array(params)?, 0)?;
    info!("close {}", addr.node_id);

    let connected = node.transport.search(&addr.node_id).is_some();
    let handle = node.channel_handle(&addr.node_id);

    if connected {
        if let Some(handle) = &handle {
            let pending = handle
                .snapshot()
                .await
                .map(|s| s.htlc_count)
                .unwrap_or(usize::MAX);
            if pending == 0 {
                return match handle.close(false).await {
                    Ok(()) => {
                        node.set_channel_state(&addr.node_id, ChannelState::Closing);
                        Ok(json!("Progressing"))
                    }
                    Err(_) => Err(RpcErrorCode::CloseStart.into()),
                };
            }
        }
    }

    // No usable connection: close unilaterally if we know the channel.
    if node.channel_state(&addr.node_id).is_some() {
        if let Some(handle) = handle {
            if handle.close(true).await.is_err() {
                return Err(RpcErrorCode::CloseFail.into());
            }
        }
        node.set_channel_state(&addr.node_id, ChannelState::ForceClosed);
        info!("unilateral close of channel with {}", addr.node_id);
        Ok(json!("unilateral close"))
    } else {
        Err(RpcErrorCode::NoChannel.into())
    }
}

async fn cmd_getlasterror(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let addr = parse_peer(node, params_array(params)?, 0)?;
    info!("getlasterror {}", addr.node_id);

    if node.transport.search(&addr.node_id).is_none() {
        return Err(RpcErrorCode::NotConnected.into());
    }
    match node.peer_error(&addr.node_id) {
        Some(error) => Err(error),
        None => Ok(Value::Null),
    }
}

async fn cmd_debug(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    match array.first().and_then(|v| v.as_u64()) {
        Some(mask) => {
            let flags = node.debug_flags.load(Ordering::SeqCst) ^ mask;
            node.debug_flags.store(flags, Ordering::SeqCst);
            Ok(json!(format!("{:08x}", flags)))
        }
        None => Ok(json!("NG")),
    }
}

async fn cmd_getcommittx(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let addr = parse_peer(node, params_array(params)?, 0)?;
    info!("getcommittx {}", addr.node_id);

    let handle = node
        .channel_handle(&addr.node_id)
        .ok_or(RpcError::from(RpcErrorCode::NoChannel))?;
    let hex_tx = handle
        .commit_tx()
        .await
        .map_err(|_| RpcError::from(RpcErrorCode::Internal))?;
    Ok(json!({ "committx": hex_tx }))
}

async fn cmd_disautoconn(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    match str_at(array, 0)? {
        "1" => {
            node.auto_connect_disabled.store(true, Ordering::SeqCst);
            Ok(json!("disable auto connect"))
        }
        "0" => {
            node.auto_connect_disabled.store(false, Ordering::SeqCst);
            Ok(json!("enable auto connect"))
        }
        _ => Err(parse_err()),
    }
}

async fn cmd_removechannel(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    let channel_id = ChannelId::from_hex(str_at(array, 0)?).ok_or_else(parse_err)?;
    if node.remove_channel_by_id(&channel_id) {
        Ok(json!("OK"))
    } else {
        Err(parse_err())
    }
}

async fn cmd_setfeerate(node: &Arc<Node>, params: &Value) -> Result<Value, RpcError> {
    let array = params_array(params)?;
    let feerate = u64_at(array, 0)?;
    if feerate > u32::MAX as u64 {
        return Err(parse_err());
    }
    info!("setfeerate {feerate}");
    node.feerate_override.store(feerate, Ordering::SeqCst);
    Ok(json!("OK"))
}

// SERVER
// ============================================================================

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": error.code, "message": error.message },
        "id": id,
    })
}

/// Process one raw JSON-RPC 2.0 request line into a response value.
pub async fn process_request(node: &Arc<Node>, raw: &str) -> Value {
    let request: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(_) => return error_response(Value::Null, parse_err()),
    };
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match request.get("method").and_then(|m| m.as_str()) {
        Some(method) => match dispatch(node, method, &params).await {
            Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": id }),
            Err(error) => error_response(id, error),
        },
        None => error_response(id, parse_err()),
    }
}

async fn handle_connection(node: Arc<Node>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = process_request(&node, &line).await;
        let mut bytes = serde_json::to_vec(&response).expect("responses serialize");
        bytes.push(b'\n');
        if write_half.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

/// Accept loop for the JSON-RPC control socket. Returns when the node's
/// stop signal fires.
pub async fn serve(node: Arc<Node>, listener: TcpListener) {
    let mut shutdown = node.shutdown_signal();
    if let Ok(addr) = listener.local_addr() {
        info!("JSON-RPC listening on {addr}");
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(handle_connection(node.clone(), stream));
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        }
    }
    info!("JSON-RPC server stopped");
}
