use thiserror::Error;

// RPC ERROR TAXONOMY
// ============================================================================
// Stable numeric codes surfaced to JSON-RPC callers. The codes never change
// across releases; clients match on them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    /// Ill-formed request or parameters
    Parse,
    /// Generic internal failure
    Internal,
    /// Peer is not connected
    NotConnected,
    /// Peer is already connected
    AlreadyConnected,
    /// No channel with the peer
    NoChannel,
    /// Channel with the peer is already open
    AlreadyOpen,
    /// Channel is mid-funding
    Opening,
    /// BOLT init exchange not yet complete
    NotInitialized,
    /// Funding could not be started
    Funding,
    /// Payment refused locally
    PayStop,
    /// Cooperative close could not be started
    CloseStart,
    /// Forced close failed
    CloseFail,
    /// Preimage deletion failure
    InvoiceErase,
    /// Outbound handshake failure
    Connect,
    /// Routing oracle found no route
    RouteNotFound,
    /// Routing oracle exceeded the hop limit
    RouteTooManyHops,
    /// Routing oracle generic failure
    RouteError,
}

impl RpcErrorCode {
    pub fn code(self) -> i64 {
        match self {
            RpcErrorCode::Parse => -32700,
            RpcErrorCode::Internal => -1,
            RpcErrorCode::NotConnected => -2,
            RpcErrorCode::AlreadyConnected => -3,
            RpcErrorCode::NoChannel => -4,
            RpcErrorCode::AlreadyOpen => -5,
            RpcErrorCode::Opening => -6,
            RpcErrorCode::NotInitialized => -7,
            RpcErrorCode::Funding => -8,
            RpcErrorCode::PayStop => -9,
            RpcErrorCode::CloseStart => -10,
            RpcErrorCode::CloseFail => -11,
            RpcErrorCode::InvoiceErase => -12,
            RpcErrorCode::Connect => -13,
            RpcErrorCode::RouteNotFound => -40,
            RpcErrorCode::RouteTooManyHops => -41,
            RpcErrorCode::RouteError => -42,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            RpcErrorCode::Parse => "invalid request",
            RpcErrorCode::Internal => "internal error",
            RpcErrorCode::NotConnected => "not connected",
            RpcErrorCode::AlreadyConnected => "already connected",
            RpcErrorCode::NoChannel => "no channel",
            RpcErrorCode::AlreadyOpen => "channel already opened",
            RpcErrorCode::Opening => "channel opening",
            RpcErrorCode::NotInitialized => "peer not initialized",
            RpcErrorCode::Funding => "fail funding",
            RpcErrorCode::PayStop => "payment stopped",
            RpcErrorCode::CloseStart => "fail start closing",
            RpcErrorCode::CloseFail => "fail unilateral close",
            RpcErrorCode::InvoiceErase => "fail erase invoice",
            RpcErrorCode::Connect => "fail connect",
            RpcErrorCode::RouteNotFound => "route not found",
            RpcErrorCode::RouteTooManyHops => "route too many hops",
            RpcErrorCode::RouteError => "fail routing",
        }
    }
}

/// Error object returned to JSON-RPC callers as `{code, message}`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({code})")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn custom(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<RpcErrorCode> for RpcError {
    fn from(code: RpcErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.message().to_string(),
        }
    }
}

// CHANNEL ERRORS
// ============================================================================
// Failures inside the commitment engine and the key ladder. Signature and
// revocation-consistency failures are fatal to the channel.

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("counterparty signature does not verify against the expected key")]
    SignatureMismatch,

    #[error("malformed DER signature")]
    InvalidSignature,

    #[error("commitment index {0} exceeds 48 bits")]
    IndexOutOfRange(u64),

    #[error("commitment index must advance monotonically")]
    StaleCommitmentIndex,

    #[error("counterparty per-commitment point unknown")]
    NoRemotePoint,

    #[error("revocation secret inconsistent with stored history")]
    RevocationInconsistent,

    #[error("no revocation secret retained for index {0}")]
    RevocationUnknown(u64),

    #[error("insufficient balance: need {required_msat} msat, have {available_msat} msat")]
    InsufficientFunds {
        required_msat: u64,
        available_msat: u64,
    },

    #[error("balance conservation violated: {local_msat} + {remote_msat} + {pending_msat} != {capacity_msat}")]
    BalanceMismatch {
        local_msat: u64,
        remote_msat: u64,
        pending_msat: u64,
        capacity_msat: u64,
    },

    #[error("unknown HTLC id {0}")]
    UnknownHtlc(u64),

    #[error("preimage does not hash to the payment hash")]
    PreimageMismatch,

    #[error("channel has pending HTLCs")]
    HtlcsPending,

    #[error("channel is closed")]
    Closed,
}

// NODE ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("chain rpc failure: {0}")]
    Chain(String),

    #[error("peer transport failure: {0}")]
    Transport(String),

    #[error("channel failure: {0}")]
    Channel(#[from] ChannelError),
}
