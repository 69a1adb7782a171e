use bitcoin::script::ScriptBuf;
use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::Transaction;

use crate::error::ChannelError;
use crate::keys::commitment::{
    commitment_point, derive_commitment_secret, derive_private_key,
};
use crate::transactions::commitment::{sign_p2wsh_input, verify_p2wsh_signature};
use crate::types::ChannelKeyManager;
use crate::INITIAL_COMMITMENT_INDEX;

/// Per-channel signer: owns the channel secrets and the 48-bit storage
/// index of the per-commitment ladder.
///
/// The index starts at 2^48 - 1 and counts DOWN as the channel advances;
/// the wire-facing commitment number counts up and is exposed separately.
pub struct ChannelSigner {
    pub keys: ChannelKeyManager,
    index: u64,
}

impl ChannelSigner {
    pub fn new(keys: ChannelKeyManager) -> Self {
        Self {
            keys,
            index: INITIAL_COMMITMENT_INDEX,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    /// BOLT-compatible commitment number for the current index.
    pub fn commitment_number(&self) -> u64 {
        INITIAL_COMMITMENT_INDEX - self.index
    }

    fn checked(index: u64) -> Result<u64, ChannelError> {
        if index > INITIAL_COMMITMENT_INDEX {
            return Err(ChannelError::IndexOutOfRange(index));
        }
        Ok(index)
    }

    /// Move the index by a signed offset. Negative offsets walk toward
    /// newer commitments.
    pub fn advance(&mut self, offset: i64) -> Result<(), ChannelError> {
        let next = self
            .index
            .checked_add_signed(offset)
            .ok_or(ChannelError::IndexOutOfRange(u64::MAX))?;
        self.index = Self::checked(next)?;
        Ok(())
    }

    /// Pin the index, used when restoring a channel from its record.
    pub fn force(&mut self, index: u64) -> Result<(), ChannelError> {
        self.index = Self::checked(index)?;
        Ok(())
    }

    /// Consume the current index and step to the next (lower) one.
    pub fn rewind(&mut self) -> Result<(), ChannelError> {
        let next = self
            .index
            .checked_sub(1)
            .ok_or(ChannelError::IndexOutOfRange(0))?;
        self.index = next;
        Ok(())
    }

    /// Secret for the current index.
    pub fn current_secret(&self) -> [u8; 32] {
        derive_commitment_secret(&self.keys.commitment_seed, self.index)
    }

    /// The secret one step behind the current index: what the local side has
    /// just revealed by advancing.
    pub fn previous_secret(&self) -> Result<[u8; 32], ChannelError> {
        let prev = Self::checked(self.index + 1)?;
        Ok(derive_commitment_secret(&self.keys.commitment_seed, prev))
    }

    pub fn secret_at(&self, index: u64) -> Result<[u8; 32], ChannelError> {
        Ok(derive_commitment_secret(
            &self.keys.commitment_seed,
            Self::checked(index)?,
        ))
    }

    /// Per-commitment point for the current index.
    pub fn per_commitment_point(&self) -> PublicKey {
        commitment_point(&self.keys.commitment_seed, self.index, &self.keys.secp_ctx)
    }

    pub fn point_at(&self, index: u64) -> Result<PublicKey, ChannelError> {
        Ok(commitment_point(
            &self.keys.commitment_seed,
            Self::checked(index)?,
            &self.keys.secp_ctx,
        ))
    }

    // SIGNING
    // ========================================================================

    pub fn funding_pubkey(&self) -> PublicKey {
        PublicKey::from_secret_key(&self.keys.secp_ctx, &self.keys.funding_key)
    }

    /// HTLC signing key for a given per-commitment point.
    pub fn htlc_privkey(&self, per_commitment_point: &PublicKey) -> SecretKey {
        derive_private_key(
            &self.keys.htlc_basepoint_secret,
            per_commitment_point,
            &self.keys.secp_ctx,
        )
    }

    /// Delayed-payment signing key for a given per-commitment point.
    pub fn delayed_payment_privkey(&self, per_commitment_point: &PublicKey) -> SecretKey {
        derive_private_key(
            &self.keys.delayed_payment_basepoint_secret,
            per_commitment_point,
            &self.keys.secp_ctx,
        )
    }

    /// Sign a P2WSH transaction input with SIGHASH_ALL.
    pub fn sign_transaction_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        script: &ScriptBuf,
        amount_sat: u64,
        secret_key: &SecretKey,
    ) -> Vec<u8> {
        sign_p2wsh_input(
            tx,
            input_index,
            script,
            amount_sat,
            secret_key,
            &self.keys.secp_ctx,
        )
    }

    /// Verify a signature received from the counterparty.
    pub fn verify_signature(
        &self,
        tx: &Transaction,
        input_index: usize,
        script: &ScriptBuf,
        amount_sat: u64,
        signature: &[u8],
        pubkey: &PublicKey,
    ) -> Result<(), ChannelError> {
        verify_p2wsh_signature(
            tx,
            input_index,
            script,
            amount_sat,
            signature,
            pubkey,
            &self.keys.secp_ctx,
        )
    }
}
