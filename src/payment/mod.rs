use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use bitcoin::blockdata::constants::ChainHash;
use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::chain::network_from_genesis;
use crate::error::{RpcError, RpcErrorCode};
use crate::node::Node;
use crate::store::{InvoiceStore, SkipStore};
use crate::types::{HtlcDirection, ShortChannelId};
use crate::MAX_ROUTE_HOPS;

/// Default `min_final_cltv_expiry` when the caller leaves it out.
pub const DEFAULT_MIN_FINAL_CLTV_EXPIRY: u32 = 9;

// ROUTING ORACLE CONTRACT
// ============================================================================

/// One hop of a computed route. `hops[0]` is the source node together with
/// its outgoing channel; the final hop carries the payee with a zero
/// short channel id.
#[derive(Clone, Debug)]
pub struct RouteHop {
    pub node_id: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub amt_to_forward_msat: u64,
    pub outgoing_cltv_value: u32,
}

/// Private routing hint (an invoice `r` field).
#[derive(Clone, Debug)]
pub struct RouteHint {
    pub node_id: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub cltv_expiry_delta: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteFailure {
    NotFound,
    TooManyHops,
    Other,
}

impl RouteFailure {
    pub fn rpc_code(self) -> RpcErrorCode {
        match self {
            RouteFailure::NotFound => RpcErrorCode::RouteNotFound,
            RouteFailure::TooManyHops => RpcErrorCode::RouteTooManyHops,
            RouteFailure::Other => RpcErrorCode::RouteError,
        }
    }
}

/// The gossip graph consumed as a precomputed oracle. Implementations must
/// honor the skip set (the union of permanent and temporary exclusions).
pub trait RoutingOracle: Send + Sync {
    fn calculate(
        &self,
        source: &PublicKey,
        dest: &PublicKey,
        final_cltv: u32,
        amount_msat: u64,
        hints: &[RouteHint],
        skip: &HashSet<ShortChannelId>,
    ) -> Result<Vec<RouteHop>, RouteFailure>;
}

// GRAPH ROUTER
// ============================================================================

/// Directed channel edge in the routing table.
#[derive(Clone, Debug)]
pub struct ChannelEdge {
    pub from: PublicKey,
    pub to: PublicKey,
    pub short_channel_id: ShortChannelId,
    pub fee_base_msat: u32,
    pub fee_proportional_millionths: u32,
    pub cltv_expiry_delta: u16,
    pub capacity_msat: u64,
}

impl ChannelEdge {
    fn fee_msat(&self, amount_msat: u64) -> u64 {
        self.fee_base_msat as u64
            + amount_msat * self.fee_proportional_millionths as u64 / 1_000_000
    }
}

/// Breadth-first router over an externally fed edge table.
#[derive(Default)]
pub struct GraphRouter {
    edges: Mutex<Vec<ChannelEdge>>,
}

impl GraphRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&self, edge: ChannelEdge) {
        self.edges.lock().unwrap().push(edge);
    }
}

impl RoutingOracle for GraphRouter {
    fn calculate(
        &self,
        source: &PublicKey,
        dest: &PublicKey,
        final_cltv: u32,
        amount_msat: u64,
        hints: &[RouteHint],
        skip: &HashSet<ShortChannelId>,
    ) -> Result<Vec<RouteHop>, RouteFailure> {
        let mut edges = self.edges.lock().unwrap().clone();
        for hint in hints {
            edges.push(ChannelEdge {
                from: hint.node_id,
                to: *dest,
                short_channel_id: hint.short_channel_id,
                fee_base_msat: hint.fee_base_msat,
                fee_proportional_millionths: hint.fee_proportional_millionths,
                cltv_expiry_delta: hint.cltv_expiry_delta,
                capacity_msat: u64::MAX,
            });
        }

        let usable = |e: &ChannelEdge| {
            !skip.contains(&e.short_channel_id) && e.capacity_msat >= amount_msat
        };

        // Breadth-first search gives the fewest-hop path.
        let mut prev: HashMap<PublicKey, ChannelEdge> = HashMap::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(*source);
        let mut visited: HashSet<PublicKey> = HashSet::new();
        visited.insert(*source);
        while let Some(current) = queue.pop_front() {
            if current == *dest {
                break;
            }
            for edge in edges.iter().filter(|e| e.from == current && usable(e)) {
                if visited.insert(edge.to) {
                    prev.insert(edge.to, edge.clone());
                    queue.push_back(edge.to);
                }
            }
        }

        if !visited.contains(dest) {
            return Err(RouteFailure::NotFound);
        }

        // Rebuild the edge path from the predecessor map.
        let mut path: Vec<ChannelEdge> = Vec::new();
        let mut cursor = *dest;
        while cursor != *source {
            let edge = prev.get(&cursor).ok_or(RouteFailure::Other)?.clone();
            cursor = edge.from;
            path.push(edge);
        }
        path.reverse();

        if path.len() + 1 > MAX_ROUTE_HOPS {
            return Err(RouteFailure::TooManyHops);
        }

        // Accumulate fees and CLTV deltas from the payee backwards.
        let mut amt = amount_msat;
        let mut cltv = final_cltv;
        let mut hops = vec![RouteHop {
            node_id: *dest,
            short_channel_id: ShortChannelId(0),
            amt_to_forward_msat: amt,
            outgoing_cltv_value: cltv,
        }];
        for edge in path.iter().rev() {
            hops.push(RouteHop {
                node_id: edge.from,
                short_channel_id: edge.short_channel_id,
                amt_to_forward_msat: amt,
                outgoing_cltv_value: cltv,
            });
            amt += edge.fee_msat(amt);
            cltv += edge.cltv_expiry_delta as u32;
        }
        hops.reverse();
        Ok(hops)
    }
}

// INVOICE ENCODING COLLABORATOR
// ============================================================================

/// BOLT-11 encoding is external; the node only needs something it can hand
/// to callers. The chain is picked by genesis-hash comparison.
pub trait InvoiceEncoder: Send + Sync {
    fn encode(&self, genesis: &ChainHash, payment_hash: &[u8; 32], amount_msat: u64)
        -> Option<String>;
}

/// Minimal placeholder encoder: correct human-readable prefix, hex payload.
pub struct HrpInvoiceEncoder;

impl InvoiceEncoder for HrpInvoiceEncoder {
    fn encode(
        &self,
        genesis: &ChainHash,
        payment_hash: &[u8; 32],
        amount_msat: u64,
    ) -> Option<String> {
        let hrp = match network_from_genesis(genesis)? {
            Network::Bitcoin => "lnbc",
            Network::Testnet => "lntb",
            Network::Signet => "lntbs",
            Network::Regtest => "lnbcrt",
            _ => return None,
        };
        Some(format!("{}{}m:{}", hrp, amount_msat, hex::encode(payment_hash)))
    }
}

// PAYMENT DRIVER
// ============================================================================

/// Parsed `routepay` request. `raw_params` is the positional parameter array
/// exactly as received, persisted so a retry can resubmit it.
#[derive(Clone, Debug)]
pub struct RoutepayRequest {
    pub payment_hash: [u8; 32],
    pub amount_msat: u64,
    pub payee: PublicKey,
    pub payer: PublicKey,
    pub min_final_cltv_expiry: u32,
    pub hints: Vec<RouteHint>,
    pub raw_params: Value,
}

/// Drive one payment attempt. `first` clears the temporary skip set and the
/// try counter before routing; retries keep both.
pub async fn routepay(node: &Arc<Node>, req: RoutepayRequest, first: bool) -> Result<Value, RpcError> {
    if first {
        node.store.skip_drop(true);
        node.pay_try_count.store(0, Ordering::SeqCst);
    }

    let height = node
        .chain
        .get_block_count()
        .await
        .map_err(|_| RpcError::from(RpcErrorCode::Parse))?;
    let final_cltv = height as u32 + req.min_final_cltv_expiry;

    let skip = node.store.skip_load();
    let hops = match node.router.calculate(
        &req.payer,
        &req.payee,
        final_cltv,
        req.amount_msat,
        &req.hints,
        &skip,
    ) {
        Ok(hops) if hops.len() >= 2 => hops,
        Ok(_) => {
            terminal_failure(node, &req.payment_hash);
            return Err(RpcErrorCode::RouteError.into());
        }
        Err(failure) => {
            debug!("fail: routing ({failure:?})");
            terminal_failure(node, &req.payment_hash);
            return Err(failure.rpc_code().into());
        }
    };

    // From here on every failure retries. The saved invoice is owned by the
    // retry chain until a terminal outcome removes it.
    let invoice_json =
        serde_json::to_string(&req.raw_params).map_err(|_| RpcError::from(RpcErrorCode::Parse))?;
    node.store.invoice_save(&req.payment_hash, &invoice_json);

    for (i, hop) in hops.iter().enumerate() {
        debug!(
            "hop[{i}]: node_id={} short_channel_id={} amount_msat={} cltv={}",
            hop.node_id, hop.short_channel_id, hop.amt_to_forward_msat, hop.outgoing_cltv_value
        );
    }

    let submitted = submit_route(node, &hops, &req.payment_hash).await;

    let try_count = node.pay_try_count.fetch_add(1, Ordering::SeqCst) + 1;
    if try_count == 1 {
        let total_msat = node.total_local_msat().await;
        info!(
            "payment: payment_hash={} payee={} total_msat={} amount_msat={}",
            hex::encode(req.payment_hash),
            req.payee,
            total_msat,
            req.amount_msat
        );
    }

    if let Err(e) = submitted {
        // Exclude the failing first hop and try the next route.
        node.store.skip_save(hops[0].short_channel_id, true);
        debug!(
            "retry: skipping {} after {e}",
            hops[0].short_channel_id
        );
        enqueue_retry(node.clone(), req.payment_hash);
    }

    Ok(json!("start payment"))
}

/// Outbound HTLC offer as handed to the wire layer.
#[derive(Serialize)]
struct AddHtlcMessage {
    r#type: &'static str,
    channel_id: String,
    amount_msat: u64,
    payment_hash: String,
    cltv_expiry: u32,
}

/// Submit the outgoing `update_add_htlc` for a computed route. `hops[0]` is
/// our own edge; `hops[1]` names the peer it leads to.
pub async fn submit_route(
    node: &Arc<Node>,
    hops: &[RouteHop],
    payment_hash: &[u8; 32],
) -> Result<(), RpcError> {
    let first_hop = &hops[0];
    let next_node = &hops[1].node_id;

    if node.transport.search(next_node).is_none() {
        return Err(RpcErrorCode::NotConnected.into());
    }
    if !node.transport.is_inited(next_node) {
        let err: RpcError = RpcErrorCode::NotInitialized.into();
        node.set_peer_error(next_node, err.clone());
        return Err(err);
    }
    let handle = node
        .channel_handle(next_node)
        .ok_or(RpcError::from(RpcErrorCode::NoChannel))?;

    handle
        .add_htlc(
            HtlcDirection::Offered,
            first_hop.amt_to_forward_msat,
            *payment_hash,
            first_hop.outgoing_cltv_value,
        )
        .await
        .map_err(|e| {
            let err = RpcError::custom(RpcErrorCode::PayStop.code(), e.to_string());
            node.set_peer_error(next_node, err.clone());
            err
        })?;

    let payload = serde_json::to_vec(&AddHtlcMessage {
        r#type: "update_add_htlc",
        channel_id: handle.channel_id.to_string(),
        amount_msat: first_hop.amt_to_forward_msat,
        payment_hash: hex::encode(payment_hash),
        cltv_expiry: first_hop.outgoing_cltv_value,
    })
    .expect("wire payloads serialize");

    node.transport
        .send(next_node, payload)
        .await
        .map_err(|e| {
            let err = RpcError::custom(RpcErrorCode::PayStop.code(), e.to_string());
            node.set_peer_error(next_node, err.clone());
            err
        })
}

/// Re-enqueue a `routepay_cont` for the saved invoice, mirroring the
/// original loopback self-send. The snapshot in the invoice store is the
/// only state the retry needs.
pub fn enqueue_retry(node: Arc<Node>, payment_hash: [u8; 32]) {
    tokio::spawn(async move {
        let Some(invoice) = node.store.invoice_load(&payment_hash) else {
            debug!("fail: invoice not found");
            return;
        };
        let params: Value = match serde_json::from_str(&invoice) {
            Ok(v) => v,
            Err(e) => {
                debug!("fail: saved invoice unreadable: {e}");
                return;
            }
        };
        let _ = crate::rpc::dispatch(&node, "routepay_cont", &params).await;
    });
}

/// Terminal payment failure: release the invoice, drop the temporary skip
/// set and record the failure time.
pub fn terminal_failure(node: &Node, payment_hash: &[u8; 32]) {
    node.store.invoice_delete(payment_hash);
    node.store.skip_drop(true);

    let date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let message = format!("[{date}]payment fail");
    *node.last_pay_err.lock().unwrap() = Some(message);
    info!(
        "payment fail: payment_hash={} try={}",
        hex::encode(payment_hash),
        node.pay_try_count.load(Ordering::SeqCst)
    );
}
