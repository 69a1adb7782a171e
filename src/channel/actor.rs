use bitcoin::consensus::encode::serialize_hex;
use bitcoin::secp256k1::PublicKey;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::channel::Channel;
use crate::error::ChannelError;
use crate::keys::revocation::RevocationStore;
use crate::keys::signer::ChannelSigner;
use crate::transactions::commitment::create_commitment_witness;
use crate::types::{ChannelId, HtlcDirection};
use crate::INITIAL_COMMITMENT_INDEX;

/// Secret and next point disclosed when a commitment round completes.
#[derive(Clone, Debug)]
pub struct RevocationReply {
    pub revoked_secret: [u8; 32],
    pub next_per_commitment_point: PublicKey,
}

/// Read-only view of a channel for RPC reporting.
#[derive(Clone, Debug)]
pub struct ChannelSnapshot {
    pub channel_id: ChannelId,
    pub local_msat: u64,
    pub remote_msat: u64,
    pub htlc_count: usize,
    pub local_commit_index: u64,
    pub remote_commit_index: u64,
    pub closing: bool,
}

pub enum ChannelCommand {
    AddHtlc {
        direction: HtlcDirection,
        amount_msat: u64,
        payment_hash: [u8; 32],
        cltv_expiry: u32,
        reply: oneshot::Sender<Result<u64, ChannelError>>,
    },
    FulfillHtlc {
        id: u64,
        preimage: [u8; 32],
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    FailHtlc {
        id: u64,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    /// Counterparty signed our next commitment; verify and revoke the old one.
    CommitmentSigned {
        signature: Vec<u8>,
        reply: oneshot::Sender<Result<RevocationReply, ChannelError>>,
    },
    /// Produce our signature over the counterparty's next commitment.
    SignRemoteCommitment {
        reply: oneshot::Sender<Result<Vec<u8>, ChannelError>>,
    },
    /// Counterparty revoked its old commitment.
    ProvideRevocation {
        secret: [u8; 32],
        next_point: PublicKey,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    /// Current local commitment, fully signed when the counterparty
    /// signature is on hand.
    CommitTx {
        reply: oneshot::Sender<Result<String, ChannelError>>,
    },
    Snapshot {
        reply: oneshot::Sender<ChannelSnapshot>,
    },
    Close {
        force: bool,
        reply: oneshot::Sender<Result<(), ChannelError>>,
    },
    Stop,
}

/// Cloneable handle commanding a channel actor.
#[derive(Clone)]
pub struct ChannelHandle {
    pub channel_id: ChannelId,
    tx: mpsc::Sender<ChannelCommand>,
}

impl ChannelHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, ChannelError>>) -> ChannelCommand,
    ) -> Result<T, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ChannelError::Closed)?;
        rx.await.map_err(|_| ChannelError::Closed)?
    }

    pub async fn add_htlc(
        &self,
        direction: HtlcDirection,
        amount_msat: u64,
        payment_hash: [u8; 32],
        cltv_expiry: u32,
    ) -> Result<u64, ChannelError> {
        self.request(|reply| ChannelCommand::AddHtlc {
            direction,
            amount_msat,
            payment_hash,
            cltv_expiry,
            reply,
        })
        .await
    }

    pub async fn fulfill_htlc(&self, id: u64, preimage: [u8; 32]) -> Result<(), ChannelError> {
        self.request(|reply| ChannelCommand::FulfillHtlc { id, preimage, reply })
            .await
    }

    pub async fn fail_htlc(&self, id: u64) -> Result<(), ChannelError> {
        self.request(|reply| ChannelCommand::FailHtlc { id, reply }).await
    }

    pub async fn commitment_signed(
        &self,
        signature: Vec<u8>,
    ) -> Result<RevocationReply, ChannelError> {
        self.request(|reply| ChannelCommand::CommitmentSigned { signature, reply })
            .await
    }

    pub async fn sign_remote_commitment(&self) -> Result<Vec<u8>, ChannelError> {
        self.request(|reply| ChannelCommand::SignRemoteCommitment { reply })
            .await
    }

    pub async fn provide_revocation(
        &self,
        secret: [u8; 32],
        next_point: PublicKey,
    ) -> Result<(), ChannelError> {
        self.request(|reply| ChannelCommand::ProvideRevocation {
            secret,
            next_point,
            reply,
        })
        .await
    }

    pub async fn commit_tx(&self) -> Result<String, ChannelError> {
        self.request(|reply| ChannelCommand::CommitTx { reply }).await
    }

    pub async fn snapshot(&self) -> Result<ChannelSnapshot, ChannelError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ChannelCommand::Snapshot { reply })
            .await
            .map_err(|_| ChannelError::Closed)?;
        rx.await.map_err(|_| ChannelError::Closed)
    }

    pub async fn close(&self, force: bool) -> Result<(), ChannelError> {
        self.request(|reply| ChannelCommand::Close { force, reply }).await
    }

    pub async fn stop(&self) {
        let _ = self.tx.send(ChannelCommand::Stop).await;
    }
}

/// Spawn the actor task owning `channel` and its signer. All commitment
/// rounds for the channel are serialized through the returned handle.
pub fn spawn_channel_actor(channel: Channel, mut signer: ChannelSigner) -> ChannelHandle {
    let (tx, rx) = mpsc::channel(32);
    let channel_id = channel.channel_id;

    // Align the signer's storage index with the channel record.
    if let Err(e) = signer.advance(-(channel.local_commit_index as i64)) {
        warn!(channel = %channel_id, "signer index out of sync: {e}");
    }

    tokio::spawn(run_channel(channel, signer, rx));
    ChannelHandle { channel_id, tx }
}

async fn run_channel(
    mut channel: Channel,
    mut signer: ChannelSigner,
    mut rx: mpsc::Receiver<ChannelCommand>,
) {
    let mut revocations = RevocationStore::new();
    let mut last_remote_sig: Option<Vec<u8>> = None;
    let mut closing = false;
    let mut failed = false;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            ChannelCommand::AddHtlc {
                direction,
                amount_msat,
                payment_hash,
                cltv_expiry,
                reply,
            } => {
                let result = if closing || failed {
                    Err(ChannelError::Closed)
                } else {
                    channel.add_htlc(direction, amount_msat, payment_hash, cltv_expiry)
                };
                let _ = reply.send(result);
            }
            ChannelCommand::FulfillHtlc { id, preimage, reply } => {
                let result = if failed {
                    Err(ChannelError::Closed)
                } else {
                    channel.fulfill_htlc(id, preimage)
                };
                let _ = reply.send(result);
            }
            ChannelCommand::FailHtlc { id, reply } => {
                let result = if failed {
                    Err(ChannelError::Closed)
                } else {
                    channel.fail_htlc(id)
                };
                let _ = reply.send(result);
            }
            ChannelCommand::CommitmentSigned { signature, reply } => {
                let result = handle_commitment_signed(
                    &mut channel,
                    &mut signer,
                    &mut last_remote_sig,
                    failed,
                    signature,
                );
                if let Err(e) = &result {
                    // Signature failures are fatal: the channel goes to
                    // unilateral close.
                    error!(channel = %channel.channel_id, "commitment verification failed: {e}");
                    failed = true;
                }
                let _ = reply.send(result);
            }
            ChannelCommand::SignRemoteCommitment { reply } => {
                let result = if failed {
                    Err(ChannelError::Closed)
                } else {
                    channel
                        .sign_remote_commitment(&signer, channel.remote_commit_index + 1)
                        .and_then(|(_, sig)| {
                            channel.advance_remote_commitment()?;
                            Ok(sig)
                        })
                };
                let _ = reply.send(result);
            }
            ChannelCommand::ProvideRevocation {
                secret,
                next_point,
                reply,
            } => {
                let result = handle_revocation(
                    &mut channel,
                    &mut revocations,
                    failed,
                    secret,
                    next_point,
                );
                if let Err(e) = &result {
                    error!(channel = %channel.channel_id, "revocation rejected: {e}");
                    failed = true;
                }
                let _ = reply.send(result);
            }
            ChannelCommand::CommitTx { reply } => {
                let result = channel.signed_local_commitment(&signer).map(
                    |(ctx, mut built, local_sig)| {
                        if let Some(remote_sig) = &last_remote_sig {
                            built.tx.input[0].witness = create_commitment_witness(
                                &ctx.funding,
                                &local_sig,
                                remote_sig,
                                &signer.keys.secp_ctx,
                            );
                        }
                        serialize_hex(&built.tx)
                    },
                );
                let _ = reply.send(result);
            }
            ChannelCommand::Snapshot { reply } => {
                let _ = reply.send(ChannelSnapshot {
                    channel_id: channel.channel_id,
                    local_msat: channel.local_msat,
                    remote_msat: channel.remote_msat,
                    htlc_count: channel.htlc_count(),
                    local_commit_index: channel.local_commit_index,
                    remote_commit_index: channel.remote_commit_index,
                    closing: closing || failed,
                });
            }
            ChannelCommand::Close { force, reply } => {
                let result = if force {
                    failed = true;
                    info!(channel = %channel.channel_id, "unilateral close requested");
                    Ok(())
                } else if channel.htlc_count() != 0 {
                    Err(ChannelError::HtlcsPending)
                } else {
                    closing = true;
                    info!(channel = %channel.channel_id, "cooperative close started");
                    Ok(())
                };
                let _ = reply.send(result);
            }
            ChannelCommand::Stop => break,
        }
    }
}

fn handle_commitment_signed(
    channel: &mut Channel,
    signer: &mut ChannelSigner,
    last_remote_sig: &mut Option<Vec<u8>>,
    failed: bool,
    signature: Vec<u8>,
) -> Result<RevocationReply, ChannelError> {
    if failed {
        return Err(ChannelError::Closed);
    }

    // Verify against the NEXT local commitment before mutating anything.
    let next_index = signer
        .index()
        .checked_sub(1)
        .ok_or(ChannelError::IndexOutOfRange(0))?;
    let next_point = signer.point_at(next_index)?;
    channel.verify_remote_signature(
        signer,
        &next_point,
        channel.local_commit_index + 1,
        &signature,
    )?;

    // Accepted: step both counters and reveal the revoked secret.
    channel.advance_local_commitment()?;
    signer.rewind()?;
    *last_remote_sig = Some(signature);

    let revoked_secret = signer.previous_secret()?;
    let next_per_commitment_point = signer.point_at(signer.index() - 1)?;
    Ok(RevocationReply {
        revoked_secret,
        next_per_commitment_point,
    })
}

fn handle_revocation(
    channel: &mut Channel,
    revocations: &mut RevocationStore,
    failed: bool,
    secret: [u8; 32],
    next_point: PublicKey,
) -> Result<(), ChannelError> {
    if failed {
        return Err(ChannelError::Closed);
    }
    if channel.remote_commit_index == 0 {
        return Err(ChannelError::StaleCommitmentIndex);
    }

    // The revoked commitment is the one before the counterparty's current.
    let revoked_number = channel.remote_commit_index - 1;
    let storage_index = INITIAL_COMMITMENT_INDEX - revoked_number;
    revocations.provide_secret(storage_index, secret)?;

    channel.remote_per_commitment_point = Some(next_point);
    Ok(())
}
