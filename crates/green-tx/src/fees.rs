//! Fee and size estimation
//!
//! Fees are charged per virtual byte. On the confidential ledger an unblinded
//! draft transaction is smaller than what will be broadcast, so its weight
//! is adjusted up by the blinding data each output is still missing.

use crate::error::BuildError;
use crate::tx::{
    varbuf_len, vsize_from_weight, ConfidentialAsset, ConfidentialNonce, RawTransaction,
};
use crate::Result;
use green_params::{Ledger, Network, MAX_MONEY};

/// Serialized size of a nonce commitment
const NONCE_LEN: usize = 33;
/// Serialized size of a value commitment
const VALUE_COMMITMENT_LEN: usize = 33;
/// Serialized size of an explicit value
const EXPLICIT_VALUE_LEN: usize = 9;

/// Fee for `vsize` virtual bytes at `fee_rate` sat/kvB, rounded up.
///
/// A fee too large to represent can never be paid.
pub fn fee_for_vsize(vsize: usize, fee_rate: u64) -> Result<u64> {
    (vsize as u64)
        .checked_mul(fee_rate)
        .and_then(|fee| fee.checked_add(999))
        .map(|fee| fee / 1000)
        .ok_or_else(|| BuildError::InsufficientFunds.into())
}

/// Largest range proof for `value` proven over at least `min_bits` bits
pub fn rangeproof_max_size(value: u64, min_bits: u32) -> usize {
    let value_bits = if value == 0 { 1 } else { 64 - value.leading_zeros() } as usize;
    let mantissa = value_bits.max(min_bits as usize);
    let rings = (mantissa + 1) / 2;
    let npubs = rings * 4 - 2 * (mantissa % 2);
    10 + 32 * (npubs + rings - 1) + 32 + (rings - 1 + 7) / 8
}

/// Size of a surjection proof over `num_inputs` inputs
pub fn surjection_proof_size(num_inputs: usize) -> usize {
    let used = num_inputs.min(3);
    2 + (num_inputs + 7) / 8 + 32 * (1 + used)
}

/// Weight of `tx` as it will be broadcast.
///
/// For the confidential ledger this includes nonces, surjection proofs,
/// value commitments and range proofs not yet attached to non-fee outputs.
pub fn estimated_weight(network: &Network, tx: &RawTransaction) -> Result<usize> {
    let weight = tx.weight()?;
    if network.ledger != Ledger::Confidential {
        return Ok(weight);
    }

    let num_inputs = tx.inputs.len().max(1);
    let sjp = varbuf_len(surjection_proof_size(num_inputs));
    let mut extra: isize = 0;
    for output in tx.outputs.iter().filter(|o| !o.is_fee()) {
        if output.nonce == ConfidentialNonce::Null {
            extra += (NONCE_LEN * 4) as isize;
        }
        if output.surjection_proof.is_empty() {
            extra += sjp as isize;
        }
        let mut value = 0;
        if let Some(explicit) = output.explicit_value() {
            value = explicit;
            extra += ((VALUE_COMMITMENT_LEN - EXPLICIT_VALUE_LEN) * 4) as isize;
        }
        if output.range_proof.is_empty() {
            if value == 0 {
                // Unknown or placeholder amount: assume the largest possible
                value = match output.asset {
                    ConfidentialAsset::Explicit(asset) if asset == network.policy_asset => {
                        MAX_MONEY
                    }
                    _ => u64::MAX,
                };
            }
            extra += varbuf_len(rangeproof_max_size(value, network.ct_bits)) as isize;
        }
    }
    Ok((weight as isize + extra).max(0) as usize)
}

/// Virtual size of `tx` as it will be broadcast
pub fn estimated_vsize(network: &Network, tx: &RawTransaction) -> Result<usize> {
    Ok(vsize_from_weight(estimated_weight(network, tx)?))
}

/// Fee for `tx` at `fee_rate`, floored at `min_fee_rate`
pub fn transaction_fee(
    network: &Network,
    tx: &RawTransaction,
    min_fee_rate: u64,
    fee_rate: u64,
) -> Result<u64> {
    fee_for_vsize(estimated_vsize(network, tx)?, fee_rate.max(min_fee_rate))
}

/// Fee rate reported for a built transaction.
///
/// The transparent ledger reports sat/kvB; the confidential ledger reports
/// the fee itself.
pub fn calculated_fee_rate(ledger: Ledger, fee: u64, vsize: usize) -> Result<u64> {
    match ledger {
        Ledger::Confidential => Ok(fee),
        Ledger::Transparent if vsize == 0 => Ok(0),
        Ledger::Transparent => fee
            .checked_mul(1000)
            .map(|fee| fee / vsize as u64)
            .ok_or_else(|| BuildError::InsufficientFunds.into()),
    }
}
