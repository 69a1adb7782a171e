use crate::types::{HtlcDirection, HtlcInfo};

// Second-stage transaction weights from BOLT 3.
pub const HTLC_SUCCESS_WEIGHT: u64 = 703;
pub const HTLC_TIMEOUT_WEIGHT: u64 = 663;

/// Weight each untrimmed HTLC adds to the commitment transaction.
pub const COMMIT_WEIGHT_PER_HTLC: u64 = 172;

/// Base commitment weight for a standard channel.
pub const COMMIT_WEIGHT_BASE: u64 = 724;

/// Fee snapshot for one commitment build: per-HTLC second-stage fees, the
/// commitment fee, and the dust absorbed by trimming.
#[derive(Clone, Debug)]
pub struct FeeInfo {
    pub feerate_per_kw: u64,
    pub dust_limit_sat: u64,
    pub commit_weight_base: u64,
    pub htlc_success_fee: u64,
    pub htlc_timeout_fee: u64,
    pub commit_fee: u64,
    pub trimmed_dust_sat: u64,
}

impl FeeInfo {
    pub fn new(feerate_per_kw: u64, dust_limit_sat: u64) -> Self {
        Self::with_base_weight(feerate_per_kw, dust_limit_sat, COMMIT_WEIGHT_BASE)
    }

    pub fn with_base_weight(feerate_per_kw: u64, dust_limit_sat: u64, base_weight: u64) -> Self {
        Self {
            feerate_per_kw,
            dust_limit_sat,
            commit_weight_base: base_weight,
            htlc_success_fee: HTLC_SUCCESS_WEIGHT * feerate_per_kw / 1000,
            htlc_timeout_fee: HTLC_TIMEOUT_WEIGHT * feerate_per_kw / 1000,
            commit_fee: 0,
            trimmed_dust_sat: 0,
        }
    }

    /// Fee required to claim an HTLC of the given direction with its
    /// second-stage transaction, as seen by the commitment holder.
    pub fn htlc_fee(&self, direction: HtlcDirection) -> u64 {
        match direction {
            HtlcDirection::Offered => self.htlc_timeout_fee,
            HtlcDirection::Received => self.htlc_success_fee,
        }
    }

    /// An HTLC is trimmed when it cannot pay for its own redemption.
    pub fn is_trimmed(&self, htlc: &HtlcInfo) -> bool {
        htlc.amount_sat() < self.dust_limit_sat + self.htlc_fee(htlc.direction)
    }

    /// Walk the HTLC list, accumulate the commitment weight of the surviving
    /// HTLCs and the dust sum of the trimmed ones. Returns the total amount
    /// the funder's balance must cover: commit fee plus trimmed dust.
    pub fn calculate(&mut self, htlcs: &[HtlcInfo]) -> u64 {
        let mut weight = self.commit_weight_base;
        let mut dusts = 0u64;

        for htlc in htlcs {
            if self.is_trimmed(htlc) {
                dusts += htlc.amount_sat();
            } else {
                weight += COMMIT_WEIGHT_PER_HTLC;
            }
        }

        self.commit_fee = weight * self.feerate_per_kw / 1000;
        self.trimmed_dust_sat = dusts;
        self.commit_fee + dusts
    }
}

/// Check if an HTLC amount falls below the dust threshold at this feerate.
pub fn is_htlc_dust(
    htlc_amount_sat: u64,
    dust_limit_sat: u64,
    feerate_per_kw: u64,
    direction: HtlcDirection,
) -> bool {
    let weight = match direction {
        HtlcDirection::Offered => HTLC_TIMEOUT_WEIGHT,
        HtlcDirection::Received => HTLC_SUCCESS_WEIGHT,
    };
    htlc_amount_sat < dust_limit_sat + weight * feerate_per_kw / 1000
}
