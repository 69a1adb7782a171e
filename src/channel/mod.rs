pub mod actor;

pub use actor::{spawn_channel_actor, ChannelCommand, ChannelHandle, ChannelSnapshot, RevocationReply};

use bitcoin::hashes::sha256::Hash as Sha256;
use bitcoin::hashes::Hash;
use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use bitcoin::{OutPoint, Txid};

use crate::error::ChannelError;
use crate::keys::signer::ChannelSigner;
use crate::scripts::{build_htlc_script, create_funding_script};
use crate::transactions::commitment::{
    build_commitment_tx, commitment_obscure_factor, sign_commitment_tx,
    verify_commitment_signature, BuiltCommitment, CommitContext, FundingInfo,
};
use crate::transactions::fees::FeeInfo;
use crate::types::{
    ChannelId, ChannelPublicKeys, CommitmentKeys, CommitmentNumber, HtlcDirection, HtlcInfo, Side,
};

/// Parameters fixed at funding time.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub funding_txid: Txid,
    pub funding_vout: u32,
    pub funding_sat: u64,
    /// Amount pushed to the non-funder at open
    pub push_msat: u64,
    pub feerate_per_kw: u64,
    pub local_dust_limit_sat: u64,
    pub remote_dust_limit_sat: u64,
    pub local_to_self_delay: u16,
    pub remote_to_self_delay: u16,
    pub local_funder: bool,
}

#[derive(Clone, Debug)]
struct PendingHtlc {
    id: u64,
    info: HtlcInfo,
}

/// Off-chain state of one channel. Owned exclusively by its actor task;
/// external readers get snapshots.
pub struct Channel {
    pub channel_id: ChannelId,
    pub funding_outpoint: OutPoint,
    pub funding_sat: u64,
    pub funding_script: ScriptBuf,
    pub local_msat: u64,
    pub remote_msat: u64,
    pub feerate_per_kw: u64,
    pub local_dust_limit_sat: u64,
    pub remote_dust_limit_sat: u64,
    pub local_to_self_delay: u16,
    pub remote_to_self_delay: u16,
    pub local_funder: bool,
    pub local_keys: ChannelPublicKeys,
    pub remote_keys: ChannelPublicKeys,
    /// The point the counterparty will use for its next commitment
    pub remote_per_commitment_point: Option<PublicKey>,
    /// Wire-facing commitment numbers, counting up from zero
    pub local_commit_index: u64,
    pub remote_commit_index: u64,
    pub obscure_factor: u64,
    htlcs: Vec<PendingHtlc>,
    next_htlc_id: u64,
}

impl Channel {
    pub fn new(
        config: ChannelConfig,
        local_keys: ChannelPublicKeys,
        remote_keys: ChannelPublicKeys,
        remote_per_commitment_point: Option<PublicKey>,
    ) -> Result<Self, ChannelError> {
        let capacity_msat = config.funding_sat * 1000;
        if config.push_msat > capacity_msat {
            return Err(ChannelError::InsufficientFunds {
                required_msat: config.push_msat,
                available_msat: capacity_msat,
            });
        }

        let (local_msat, remote_msat) = if config.local_funder {
            (capacity_msat - config.push_msat, config.push_msat)
        } else {
            (config.push_msat, capacity_msat - config.push_msat)
        };

        // The funder opened the channel, so its payment basepoint comes
        // first in the obscure-factor hash.
        let obscure_factor = if config.local_funder {
            commitment_obscure_factor(
                &local_keys.payment_basepoint,
                &remote_keys.payment_basepoint,
            )
        } else {
            commitment_obscure_factor(
                &remote_keys.payment_basepoint,
                &local_keys.payment_basepoint,
            )
        };

        let funding_script =
            create_funding_script(&local_keys.funding_pubkey, &remote_keys.funding_pubkey);

        Ok(Self {
            channel_id: ChannelId::from_funding_outpoint(&config.funding_txid, config.funding_vout),
            funding_outpoint: OutPoint {
                txid: config.funding_txid,
                vout: config.funding_vout,
            },
            funding_sat: config.funding_sat,
            funding_script,
            local_msat,
            remote_msat,
            feerate_per_kw: config.feerate_per_kw,
            local_dust_limit_sat: config.local_dust_limit_sat,
            remote_dust_limit_sat: config.remote_dust_limit_sat,
            local_to_self_delay: config.local_to_self_delay,
            remote_to_self_delay: config.remote_to_self_delay,
            local_funder: config.local_funder,
            local_keys,
            remote_keys,
            remote_per_commitment_point,
            local_commit_index: 0,
            remote_commit_index: 0,
            obscure_factor,
            htlcs: Vec::new(),
            next_htlc_id: 0,
        })
    }

    pub fn capacity_msat(&self) -> u64 {
        self.funding_sat * 1000
    }

    pub fn pending_htlc_msat(&self) -> u64 {
        self.htlcs.iter().map(|h| h.info.amount_msat).sum()
    }

    pub fn htlc_count(&self) -> usize {
        self.htlcs.len()
    }

    /// local + remote + pending must always equal the channel capacity.
    fn check_balance(&self) -> Result<(), ChannelError> {
        let pending = self.pending_htlc_msat();
        if self.local_msat + self.remote_msat + pending != self.capacity_msat() {
            return Err(ChannelError::BalanceMismatch {
                local_msat: self.local_msat,
                remote_msat: self.remote_msat,
                pending_msat: pending,
                capacity_msat: self.capacity_msat(),
            });
        }
        Ok(())
    }

    // HTLC LIFECYCLE
    // ========================================================================

    /// Add an HTLC, debiting the sender's balance. Returns the HTLC id.
    pub fn add_htlc(
        &mut self,
        direction: HtlcDirection,
        amount_msat: u64,
        payment_hash: [u8; 32],
        cltv_expiry: u32,
    ) -> Result<u64, ChannelError> {
        let balance = match direction {
            HtlcDirection::Offered => &mut self.local_msat,
            HtlcDirection::Received => &mut self.remote_msat,
        };
        if *balance < amount_msat {
            return Err(ChannelError::InsufficientFunds {
                required_msat: amount_msat,
                available_msat: *balance,
            });
        }
        *balance -= amount_msat;

        let id = self.next_htlc_id;
        self.next_htlc_id += 1;
        self.htlcs.push(PendingHtlc {
            id,
            info: HtlcInfo::new(direction, amount_msat, cltv_expiry, payment_hash),
        });
        self.check_balance()?;
        Ok(id)
    }

    fn take_htlc(&mut self, id: u64) -> Result<HtlcInfo, ChannelError> {
        let pos = self
            .htlcs
            .iter()
            .position(|h| h.id == id)
            .ok_or(ChannelError::UnknownHtlc(id))?;
        Ok(self.htlcs.remove(pos).info)
    }

    /// Settle an HTLC with its preimage, crediting the recipient.
    pub fn fulfill_htlc(&mut self, id: u64, preimage: [u8; 32]) -> Result<(), ChannelError> {
        let hash = Sha256::hash(&preimage).to_byte_array();
        let info = {
            let entry = self
                .htlcs
                .iter()
                .find(|h| h.id == id)
                .ok_or(ChannelError::UnknownHtlc(id))?;
            if entry.info.payment_hash != hash {
                return Err(ChannelError::PreimageMismatch);
            }
            self.take_htlc(id)?
        };
        match info.direction {
            HtlcDirection::Offered => self.remote_msat += info.amount_msat,
            HtlcDirection::Received => self.local_msat += info.amount_msat,
        }
        self.check_balance()
    }

    /// Fail an HTLC, refunding the sender.
    pub fn fail_htlc(&mut self, id: u64) -> Result<(), ChannelError> {
        let info = self.take_htlc(id)?;
        match info.direction {
            HtlcDirection::Offered => self.local_msat += info.amount_msat,
            HtlcDirection::Received => self.remote_msat += info.amount_msat,
        }
        self.check_balance()
    }

    // COMMITMENT INDEX BOOKKEEPING
    // ========================================================================

    pub fn advance_local_commitment(&mut self) -> Result<(), ChannelError> {
        CommitmentNumber::new(self.local_commit_index + 1)?;
        self.local_commit_index += 1;
        Ok(())
    }

    pub fn advance_remote_commitment(&mut self) -> Result<(), ChannelError> {
        CommitmentNumber::new(self.remote_commit_index + 1)?;
        self.remote_commit_index += 1;
        Ok(())
    }

    // COMMITMENT CONSTRUCTION
    // ========================================================================

    /// Assemble the ephemeral signing view for one side's commitment at the
    /// given commitment number.
    pub fn build_commit_context(
        &self,
        side: Side,
        per_commitment_point: &PublicKey,
        commitment_number: u64,
        local_funding_key: SecretKey,
        secp: &Secp256k1<All>,
    ) -> Result<CommitContext, ChannelError> {
        let number = CommitmentNumber::new(commitment_number)?;

        // "Local" below means the side whose commitment this is.
        let (keys, to_self_delay, dust_limit, local_msat, remote_msat, funder_is_owner) = match side
        {
            Side::Local => (
                CommitmentKeys::from_basepoints(
                    per_commitment_point,
                    &self.local_keys.delayed_payment_basepoint,
                    &self.local_keys.htlc_basepoint,
                    &self.remote_keys.revocation_basepoint,
                    &self.remote_keys.htlc_basepoint,
                    &self.remote_keys.payment_basepoint,
                    secp,
                ),
                self.local_to_self_delay,
                self.local_dust_limit_sat,
                self.local_msat,
                self.remote_msat,
                self.local_funder,
            ),
            Side::Remote => (
                CommitmentKeys::from_basepoints(
                    per_commitment_point,
                    &self.remote_keys.delayed_payment_basepoint,
                    &self.remote_keys.htlc_basepoint,
                    &self.local_keys.revocation_basepoint,
                    &self.local_keys.htlc_basepoint,
                    &self.local_keys.payment_basepoint,
                    secp,
                ),
                self.remote_to_self_delay,
                self.remote_dust_limit_sat,
                self.remote_msat,
                self.local_msat,
                !self.local_funder,
            ),
        };

        // HTLC directions are relative to the commitment owner.
        let mut htlcs: Vec<HtlcInfo> = self
            .htlcs
            .iter()
            .map(|h| {
                let mut info = h.info.clone();
                info.witness_script = None;
                if side == Side::Remote {
                    info.direction = match info.direction {
                        HtlcDirection::Offered => HtlcDirection::Received,
                        HtlcDirection::Received => HtlcDirection::Offered,
                    };
                }
                info
            })
            .collect();
        for htlc in htlcs.iter_mut() {
            build_htlc_script(
                htlc,
                &keys.local_htlc_key,
                &keys.revocation_key,
                &keys.remote_htlc_key,
            );
        }

        let mut fee = FeeInfo::new(self.feerate_per_kw, dust_limit);
        fee.calculate(&htlcs);

        // The funder's balance bears the commitment fee in both views.
        let (local_fee_sat, remote_fee_sat) = if funder_is_owner {
            (fee.commit_fee, 0)
        } else {
            (0, fee.commit_fee)
        };

        Ok(CommitContext {
            side,
            funding: FundingInfo {
                txid: self.funding_outpoint.txid,
                vout: self.funding_outpoint.vout,
                amount_sat: self.funding_sat,
                redeem_script: self.funding_script.clone(),
                local_funding_key,
                remote_funding_pubkey: self.remote_keys.funding_pubkey,
            },
            keys,
            to_self_delay,
            fee,
            local_msat,
            remote_msat,
            local_fee_sat,
            remote_fee_sat,
            obscured_commitment_number: number.value() ^ self.obscure_factor,
            htlcs,
        })
    }

    /// Build and locally sign the current local commitment.
    pub fn signed_local_commitment(
        &self,
        signer: &ChannelSigner,
    ) -> Result<(CommitContext, BuiltCommitment, Vec<u8>), ChannelError> {
        let point = signer.per_commitment_point();
        let ctx = self.build_commit_context(
            Side::Local,
            &point,
            self.local_commit_index,
            signer.keys.funding_key,
            &signer.keys.secp_ctx,
        )?;
        let built = build_commitment_tx(&ctx);
        let signature = sign_commitment_tx(&built.tx, &ctx.funding, &signer.keys.secp_ctx);
        Ok((ctx, built, signature))
    }

    /// Reconstruct the local commitment at `commitment_number` and check the
    /// counterparty's signature. A mismatch is fatal to the channel.
    pub fn verify_remote_signature(
        &self,
        signer: &ChannelSigner,
        per_commitment_point: &PublicKey,
        commitment_number: u64,
        signature: &[u8],
    ) -> Result<BuiltCommitment, ChannelError> {
        let ctx = self.build_commit_context(
            Side::Local,
            per_commitment_point,
            commitment_number,
            signer.keys.funding_key,
            &signer.keys.secp_ctx,
        )?;
        let built = build_commitment_tx(&ctx);
        verify_commitment_signature(&built.tx, &ctx.funding, signature, &signer.keys.secp_ctx)?;
        Ok(built)
    }

    /// Build and sign the counterparty's commitment at its next number.
    pub fn sign_remote_commitment(
        &self,
        signer: &ChannelSigner,
        commitment_number: u64,
    ) -> Result<(BuiltCommitment, Vec<u8>), ChannelError> {
        let point = self
            .remote_per_commitment_point
            .ok_or(ChannelError::NoRemotePoint)?;
        let ctx = self.build_commit_context(
            Side::Remote,
            &point,
            commitment_number,
            signer.keys.funding_key,
            &signer.keys.secp_ctx,
        )?;
        let built = build_commitment_tx(&ctx);
        let signature = sign_commitment_tx(&built.tx, &ctx.funding, &signer.keys.secp_ctx);
        Ok((built, signature))
    }
}
