//! Coin selection and fee convergence for one asset
//!
//! Each asset paid in a transaction gets one pass. A pass adds the asset's
//! addressee outputs, selects inputs first-fit, then iterates: compute the
//! fee, add inputs while short, and place or drop change until the amounts
//! settle. The policy asset runs last because its outputs also carry the fee.
//!
//! Selection is deliberately first-fit in candidate order; it is not an
//! optimising coin selector.

use crate::amount::Amount;
use crate::error::BuildError;
use crate::fees::transaction_fee;
use crate::record::{Addressee, BuildRecord, Utxo, UtxoStrategy};
use crate::session::BuildContext;
use crate::spend::add_utxo;
use crate::tx::{ConfidentialAsset, ConfidentialNonce, ConfidentialValue, RawTransaction, TxOut};
use crate::{Error, Result};
use green_params::{AssetId, Ledger};
use rand::Rng;
use std::collections::BTreeSet;

/// Outcome of one iteration of the fee loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Convergence {
    /// Inputs or outputs changed; recompute the fee
    Continue,
    /// Amounts are settled
    Done,
    /// No candidate left to cover amount plus fee
    InsufficientFunds,
}

/// Iteration bound for a pass over `candidates` UTXOs
pub(crate) fn max_loop_iterations(candidates: usize) -> usize {
    // +1 covers send-all with no candidates
    8.max(candidates * 2 + 1)
}

/// Append or insert the output for one addressee, returning its amount
pub(crate) fn add_addressee_output(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    tx: &mut RawTransaction,
    addressee: &Addressee,
) -> Result<Amount> {
    let policy_asset = ctx.network.policy_asset;
    let asset = addressee.asset_or(policy_asset);

    if let Some(preblinded) = &addressee.preblinded {
        if crate::crypto::is_zero_scalar(&preblinded.asset_blinder) {
            return Err(BuildError::PreblindedNotBlinded.into());
        }
        let generator = ctx.primitives.asset_generator(&asset, &preblinded.asset_blinder)?;
        let commitment = match (&preblinded.amount_blinder, &preblinded.commitment) {
            (Some(vbf), _) => {
                if crate::crypto::is_zero_scalar(vbf) {
                    return Err(BuildError::PreblindedNotBlinded.into());
                }
                ctx.primitives.value_commitment(addressee.amount, vbf, &generator)?
            }
            (None, Some(commitment)) => *commitment,
            (None, None) => {
                return Err(Error::InvalidState(format!(
                    "pre-blinded output to {} has no value commitment",
                    addressee.address
                )))
            }
        };
        let index = addressee
            .index
            .ok_or_else(|| Error::InvalidState("pre-blinded output has no index".to_string()))?;
        if index > tx.outputs.len() {
            return Err(Error::InvalidState(format!(
                "pre-blinded output index {} past {} outputs",
                index,
                tx.outputs.len()
            )));
        }
        tx.outputs.insert(
            index,
            TxOut {
                value: ConfidentialValue::Confidential(commitment),
                asset: ConfidentialAsset::Confidential(generator),
                nonce: ConfidentialNonce::Confidential(preblinded.nonce_commitment),
                script_pubkey: addressee.script_pubkey.clone(),
                surjection_proof: preblinded.surjection_proof.clone(),
                range_proof: preblinded.range_proof.clone(),
            },
        );
        return Ok(Amount::from_sat(addressee.amount));
    }

    if !record.send_all && ctx.fee_policy().is_dust(&asset, addressee.amount) {
        record.set_error(BuildError::InvalidAmount);
    }
    tx.add_output(TxOut::explicit(
        ctx.network.ledger,
        asset,
        addressee.amount,
        addressee.script_pubkey.clone(),
    ));
    Ok(Amount::from_sat(addressee.amount))
}

/// Append a zero-value output to the change address for `asset`
pub(crate) fn add_change_output(
    ctx: &BuildContext<'_>,
    record: &BuildRecord,
    tx: &mut RawTransaction,
    asset: AssetId,
) -> Result<usize> {
    let change = record
        .change_address
        .get(&asset)
        .ok_or_else(|| Error::InvalidState(format!("no change address for {}", asset)))?;
    Ok(tx.add_output(TxOut::explicit(
        ctx.network.ledger,
        asset,
        0,
        change.script_pubkey.clone(),
    )))
}

/// Append the zero-value fee output
pub(crate) fn add_fee_output(ctx: &BuildContext<'_>, tx: &mut RawTransaction) -> usize {
    tx.add_output(TxOut::explicit(
        ctx.network.ledger,
        ctx.network.policy_asset,
        0,
        Vec::new(),
    ))
}

/// Set the final change amount; on the transparent ledger also move the
/// change output to a random position, keeping the others in order
fn update_change_output(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    tx: &mut RawTransaction,
    change_index: Option<usize>,
    change_amount: Amount,
    asset: AssetId,
) {
    let Some(mut index) = change_index else {
        record.change_amount.insert(asset, 0);
        record.change_index.remove(&asset);
        return;
    };

    tx.outputs[index].set_explicit_value(change_amount.to_sat());
    if ctx.network.ledger == Ledger::Transparent {
        let new_index = rand::thread_rng().gen_range(0..tx.outputs.len());
        while index < new_index {
            tx.outputs.swap(index, index + 1);
            index += 1;
        }
        while index > new_index {
            tx.outputs.swap(index, index - 1);
            index -= 1;
        }
    }
    tracing::debug!("change of {} for {} at output {}", change_amount, asset, index);
    record.change_amount.insert(asset, change_amount.to_sat());
    record.change_index.insert(asset, index);
}

/// Run the selection and fee pass for `asset`, returning the fee it settled on.
///
/// `reordered` collects the positions of the addressees paid in this pass;
/// `used_utxos` accumulates newly selected inputs across passes.
#[allow(clippy::too_many_arguments)]
pub(crate) fn create_tx_outputs(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    tx: &mut RawTransaction,
    asset: AssetId,
    asset_ids: &BTreeSet<AssetId>,
    reordered: &mut Vec<usize>,
    used_utxos: &mut Vec<Utxo>,
) -> Result<Amount> {
    let network = ctx.network;
    let policy_asset = network.policy_asset;
    let confidential = network.is_confidential();
    let is_partial = record.is_partial;
    let is_rbf = record.is_rbf;
    let manual = record.strategy == UtxoStrategy::Manual;
    let send_all = record.send_all;

    let mut current_used: Vec<Utxo> = Vec::new();
    let mut available_total = Amount::ZERO;
    let mut total = Amount::ZERO;
    let mut fee = Amount::ZERO;

    if is_rbf {
        // Replaced inputs stay first and are never shuffled
        let mut old = std::mem::take(&mut record.old_used_utxos);
        let added = old.iter_mut().try_for_each(|utxo| -> Result<()> {
            add_utxo(ctx, tx, utxo)?;
            available_total = available_total.checked_add(utxo.amount.into())?;
            total = total.checked_add(utxo.amount.into())?;
            Ok(())
        });
        record.old_used_utxos = old;
        added?;
    }

    let mut required_total = Amount::ZERO;
    let addressees = record.addressees.clone();
    for (i, addressee) in addressees.iter().enumerate() {
        if addressee.asset_or(policy_asset) != asset {
            continue;
        }
        let amount = add_addressee_output(ctx, record, tx, addressee)?;
        required_total = required_total.checked_add(amount)?;
        reordered.push(i);
        if let Some(index) = addressee.index {
            for change_index in record.change_index.values_mut() {
                if *change_index >= index {
                    *change_index += 1;
                }
            }
        }
    }

    if manual {
        let mut selected = std::mem::take(&mut record.used_utxos);
        let mut outcome = Ok(());
        for utxo in selected.iter_mut() {
            if let Err(e) = add_utxo(ctx, tx, utxo) {
                outcome = Err(e);
                break;
            }
            if confidential {
                if !is_partial && utxo.asset != policy_asset && !asset_ids.contains(&utxo.asset) {
                    record.set_error(BuildError::MissingAssetRecipient(utxo.asset));
                    break;
                }
                if utxo.asset != asset {
                    continue;
                }
            }
            available_total = available_total.saturating_add(utxo.amount.into());
            total = total.saturating_add(utxo.amount.into());
            current_used.push(utxo.clone());
        }
        record.used_utxos = selected;
        outcome?;
    } else {
        match record.utxos.get(&asset).cloned() {
            None => {
                if !is_rbf {
                    record.set_error(BuildError::InsufficientFunds);
                }
            }
            Some(candidates) => {
                for mut utxo in candidates {
                    let value = Amount::from_sat(utxo.amount);
                    if send_all || total < required_total {
                        add_utxo(ctx, tx, &mut utxo)?;
                        total = total.checked_add(value)?;
                        current_used.push(utxo);
                    }
                    available_total = available_total.checked_add(value)?;
                }
            }
        }
    }
    record.available_total = available_total.to_sat();

    let mut have_change = false;
    let mut change_index: Option<usize> = None;
    let mut fee_index: Option<usize> = None;

    if is_rbf && record.change_index_for(&asset).is_some() {
        change_index = Some(add_change_output(ctx, record, tx, policy_asset)?);
        have_change = true;
    }

    let user_fee_rate = *record.fee_rate.get_or_insert(network.default_fee_rate);
    let policy = ctx.fee_policy();
    let dust_threshold = Amount::from_sat(policy.dust_threshold(&asset));
    let min_fee_rate = policy.min_fee_rate();
    let network_fee = Amount::from_sat(record.network_fee);

    if !is_partial && !record.change_address.contains_key(&asset) {
        if record.change_subaccount.is_none() {
            record.change_subaccount = Some(record.single_subaccount()?);
        }
        let subaccount = record.change_subaccount.unwrap_or_default();
        let address = ctx.wallet.receive_address(subaccount, true)?;
        tracing::debug!("new change address in subaccount {} for {}", subaccount, asset);
        record.change_address.insert(asset, address);
    }

    let include_fee = asset == policy_asset && !is_partial;
    let candidate_count = record.utxos.get(&asset).map_or(0, Vec::len);
    let max_iterations = max_loop_iterations(candidate_count);
    let num_addressees = record.addressees.len();
    let mut force_add_utxo = false;
    let mut settled = is_partial;

    for iteration in 0..max_iterations {
        if settled {
            break;
        }
        if include_fee {
            if confidential && fee_index.is_none() {
                // Placeholder so the fee output counts towards the weight
                fee_index = Some(add_fee_output(ctx, tx));
            }
            fee = Amount::from_sat(transaction_fee(network, tx, min_fee_rate, user_fee_rate)?)
                .checked_add(network_fee)?;
        }
        tracing::trace!(
            "{} pass iteration {}: total {}, required {}, fee {}",
            asset,
            iteration,
            total,
            required_total,
            fee
        );

        let sends_everything = send_all
            && record
                .addressees
                .first()
                .map(|a| a.asset_or(policy_asset) == asset)
                .unwrap_or(false);

        let step = if sends_everything {
            if available_total < fee.saturating_add(dust_threshold) {
                // Only dust would be left after the fee
                Convergence::InsufficientFunds
            } else {
                required_total = available_total.checked_sub(fee)?;
                if let Some(output) = tx.outputs.first_mut() {
                    output.set_explicit_value(required_total.to_sat());
                }
                if num_addressees == 1 {
                    record.addressees[0].amount = required_total.to_sat();
                }
                Convergence::Done
            }
        } else {
            let required_with_fee = required_total.checked_add(fee)?;
            if total < required_with_fee || force_add_utxo {
                force_add_utxo = false;
                let candidates = record.utxos.get(&asset);
                match candidates.and_then(|c| c.get(current_used.len())) {
                    Some(next) if !manual => {
                        let mut utxo = next.clone();
                        add_utxo(ctx, tx, &mut utxo)?;
                        total = total.checked_add(utxo.amount.into())?;
                        current_used.push(utxo);
                        Convergence::Continue
                    }
                    _ => Convergence::InsufficientFunds,
                }
            } else {
                let change = total.checked_sub(required_with_fee)?;
                if (!have_change && change < dust_threshold)
                    || (have_change && change >= dust_threshold)
                {
                    if !have_change {
                        // Leftover dust goes to the miners
                        fee = fee.checked_add(change)?;
                    }
                    Convergence::Done
                } else if have_change {
                    // Adding change made it dust; pull in another input
                    force_add_utxo = true;
                    Convergence::Continue
                } else {
                    let mut index = add_change_output(ctx, record, tx, asset)?;
                    have_change = true;
                    if confidential && include_fee {
                        if let Some(fee_at) = fee_index {
                            tx.outputs.swap(fee_at, index);
                            fee_index = Some(index);
                            index = fee_at;
                        }
                    }
                    change_index = Some(index);
                    record.change_index.insert(asset, index);
                    Convergence::Continue
                }
            }
        };

        match step {
            Convergence::Continue => continue,
            Convergence::Done => settled = true,
            Convergence::InsufficientFunds => {
                record.set_error(BuildError::InsufficientFunds);
                settled = true;
            }
        }
        record.fee = fee.to_sat();
        record.network_fee = network_fee.to_sat();
    }

    if !manual {
        used_utxos.extend(current_used);
    }

    if !settled {
        tracing::error!(
            "fee loop for {} did not settle after {} iterations: {:?}",
            asset,
            max_iterations,
            record
        );
        return Err(Error::FeeLoopExhausted {
            iterations: max_iterations,
        });
    }

    let change_amount = if have_change {
        total.saturating_sub(required_total).saturating_sub(fee)
    } else {
        Amount::ZERO
    };
    let change_index = change_index.filter(|_| have_change);
    update_change_output(ctx, record, tx, change_index, change_amount, asset);

    if include_fee && confidential {
        if let Some(index) = fee_index {
            tx.outputs[index].set_explicit_value(fee.to_sat());
        }
    }

    if required_total.is_zero() && (!include_fee || !confidential) {
        record.set_error(BuildError::NoAmountSpecified);
    } else if user_fee_rate < min_fee_rate {
        record.set_error(BuildError::FeeRateBelowMinimum);
    }

    if !manual {
        record.used_utxos = used_utxos.clone();
    }
    record.satoshi.insert(asset, required_total.to_sat());
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_bound() {
        assert_eq!(max_loop_iterations(0), 8);
        assert_eq!(max_loop_iterations(3), 8);
        assert_eq!(max_loop_iterations(4), 9);
        assert_eq!(max_loop_iterations(100), 201);
    }
}
