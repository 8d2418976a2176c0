//! Transaction creation entry point
//!
//! [`create_transaction`] takes a [`BuildRecord`] describing a payment, a
//! fee bump or a sweep and fills in a fee-balanced [`RawTransaction`] with
//! placeholder signatures. User-correctable problems are recorded on the
//! record; only fatal conditions are returned as errors.

use crate::error::BuildError;
use crate::fees::{calculated_fee_rate, estimated_weight};
use crate::record::{Addressee, BuildRecord, OutputInfo, TxSizeInfo, UtxoStrategy};
use crate::selection::create_tx_outputs;
use crate::session::BuildContext;
use crate::tx::{vsize_from_weight, RawTransaction, TX_VERSION_2};
use crate::{Error, Result};
use green_params::{AssetId, Ledger, Network};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeSet;

/// Chance, as 1 in N, that the default locktime is moved back
const ANTI_SNIPE_ODDS: u32 = 10;
/// Largest step back of an anti fee-sniping locktime
const ANTI_SNIPE_MAX_BLOCKS: u32 = 100;

/// Build the transaction described by `record`.
///
/// On return `record.transaction` holds the transaction built so far and
/// `record.error()` the first user-correctable problem, if any.
pub fn create_transaction(ctx: &BuildContext<'_>, record: &mut BuildRecord) -> Result<()> {
    let version = record.version.unwrap_or(TX_VERSION_2);
    let mut tx = RawTransaction::with_capacity(ctx.network.ledger, version, 0, 0, 0);
    let outcome = create_transaction_impl(ctx, record, &mut tx)
        .or_else(|e| record_build_error(record, e))
        .and_then(|()| update_tx_size_info(ctx.network, record, &tx))
        .or_else(|e| record_build_error(record, e));
    if outcome.is_ok() {
        record.transaction = Some(tx);
    }
    outcome
}

/// Keep user-correctable errors on the record; pass fatal ones through
fn record_build_error(record: &mut BuildRecord, error: Error) -> Result<()> {
    match error {
        Error::Build(e) => {
            record.set_error(e);
            Ok(())
        }
        other => Err(other),
    }
}

fn create_transaction_impl(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    tx: &mut RawTransaction,
) -> Result<()> {
    let network = ctx.network;
    let policy_asset = network.policy_asset;
    let confidential = network.is_confidential();

    let subaccounts = record.tx_subaccounts();
    crate::bump::check_bump_tx(ctx, record, &subaccounts)?;

    if record.is_redeposit {
        record.send_all = true;
    }
    record.is_sweep = record.private_key.is_some();
    record.addressees_read_only =
        record.is_redeposit || record.is_rbf || record.is_cpfp || record.is_sweep;

    if record.is_partial
        && (record.send_all
            || record.is_rbf
            || record.is_cpfp
            || record.is_sweep
            || record.strategy != UtxoStrategy::Manual)
    {
        return Err(Error::InvalidState(
            "partial transactions must select inputs manually and cannot send all, bump or sweep"
                .to_string(),
        ));
    }

    if record.addressees.is_empty() {
        return Err(BuildError::NoRecipients.into());
    }

    if record.is_sweep {
        prepare_sweep(ctx, record)?;
    }
    record.amount_read_only = record.send_all || record.addressees_read_only;

    match record.strategy {
        UtxoStrategy::Manual if record.used_utxos.is_empty() => {
            record.set_error(BuildError::NoUtxosFound)
        }
        UtxoStrategy::Manual => {}
        UtxoStrategy::Default => record.used_utxos.clear(),
    }

    if record.is_rbf && record.send_all && !record.is_redeposit {
        return Err(Error::InvalidState(
            "send all is only valid for redeposit replacements".to_string(),
        ));
    }
    if record.send_all && record.addressees.len() > 1 {
        record.set_error(BuildError::SendAllRequiresSingleRecipient);
    }

    tx.version = record.version.unwrap_or(TX_VERSION_2);
    tx.lock_time = choose_locktime(ctx, record)?;

    let candidate_count: usize = record.utxos.values().map(Vec::len).sum();
    tx.inputs
        .reserve(record.old_used_utxos.len() + record.used_utxos.len() + candidate_count);
    tx.outputs.reserve(record.addressees.len() * 2 + 1);

    let mut addressees = std::mem::take(&mut record.addressees);
    let validated = addressees
        .iter_mut()
        .try_for_each(|addressee| validate_addressee(ctx, record, addressee));
    record.addressees = addressees;
    validated?;

    let asset_ids: BTreeSet<AssetId> = record
        .addressees
        .iter()
        .map(|a| a.asset_or(policy_asset))
        .collect();
    tracing::debug!(
        "creating transaction: {} addressees, {} assets, send_all {}, rbf {}, cpfp {}",
        record.addressees.len(),
        asset_ids.len(),
        record.send_all,
        record.is_rbf,
        record.is_cpfp
    );

    let mut reordered: Vec<usize> = Vec::with_capacity(record.addressees.len());
    let mut used_utxos = Vec::new();
    if confidential {
        for asset in asset_ids.iter().filter(|a| **a != policy_asset) {
            create_tx_outputs(
                ctx,
                record,
                tx,
                *asset,
                &asset_ids,
                &mut reordered,
                &mut used_utxos,
            )?;
        }
    }
    if !record.is_partial || asset_ids.contains(&policy_asset) {
        create_tx_outputs(
            ctx,
            record,
            tx,
            policy_asset,
            &asset_ids,
            &mut reordered,
            &mut used_utxos,
        )?;
    }

    if !record.has_error() && reordered.len() == record.addressees.len() {
        record.addressees = reordered.iter().map(|&i| record.addressees[i].clone()).collect();
    }

    update_tx_info(ctx, record, tx);

    if record.is_rbf && !record.has_error() {
        check_replacement_fee(network, record, tx)?;
    }

    let first_new = record.old_used_utxos.len();
    if record.randomize_inputs && tx.inputs.len() > first_new + 1 {
        tx.inputs[first_new..].shuffle(&mut rand::thread_rng());
    }
    Ok(())
}

/// Load sweep candidates and turn the request into send-all
fn prepare_sweep(ctx: &BuildContext<'_>, record: &mut BuildRecord) -> Result<()> {
    if ctx.network.is_confidential() {
        return Err(BuildError::SweepNotSupported.into());
    }
    let policy_asset = ctx.network.policy_asset;

    let have_candidates = record.utxos.values().any(|u| !u.is_empty());
    if have_candidates {
        if !record.utxos.values().flatten().all(|u| u.is_external_key()) {
            return Err(Error::InvalidState(
                "sweep candidates must spend the sweep key".to_string(),
            ));
        }
    } else {
        let private_key = record.private_key.clone().unwrap_or_default();
        let utxos = match ctx.wallet.unspent_outputs_for_private_key(&private_key) {
            Ok(utxos) => utxos,
            Err(Error::InvalidKey(reason)) => {
                tracing::warn!("sweep key rejected: {}", reason);
                return Err(BuildError::InvalidPrivateKey.into());
            }
            Err(e) => return Err(e),
        };
        if utxos.is_empty() {
            return Err(BuildError::NoUtxosFound.into());
        }
        tracing::info!("sweeping {} outputs", utxos.len());
        record.utxos.insert(policy_asset, utxos);
    }

    record.send_all = true;
    match record.addressees.as_mut_slice() {
        [addressee] => addressee.amount = 0,
        _ => return Err(Error::InvalidState("sweep requires exactly one addressee".to_string())),
    }
    Ok(())
}

fn choose_locktime(ctx: &BuildContext<'_>, record: &BuildRecord) -> Result<u32> {
    if let Some(locktime) = record.locktime {
        return Ok(locktime);
    }
    let mut locktime = ctx.wallet.block_height()?;
    if !record.is_rbf {
        let mut rng = rand::thread_rng();
        if rng.gen_range(0..ANTI_SNIPE_ODDS) == 0 {
            locktime = locktime.saturating_sub(rng.gen_range(0..ANTI_SNIPE_MAX_BLOCKS));
        }
    }
    Ok(locktime)
}

/// Resolve and check one addressee.
///
/// Fills in the locking script and blinding key. Problems are returned as
/// [`Error::Build`].
pub fn validate_addressee(
    ctx: &BuildContext<'_>,
    record: &BuildRecord,
    addressee: &mut Addressee,
) -> Result<()> {
    let network = ctx.network;
    if addressee.address.is_empty() {
        return Err(BuildError::InvalidAddress.into());
    }

    match (network.ledger, addressee.asset) {
        (Ledger::Transparent, Some(asset)) if asset != network.policy_asset => {
            return Err(BuildError::InvalidAssetId.into());
        }
        (Ledger::Confidential, Some(asset)) if asset == AssetId::NATIVE => {
            return Err(BuildError::InvalidAssetId.into());
        }
        _ => {}
    }

    if addressee.is_preblinded() {
        if !network.is_confidential() || addressee.index.is_none() {
            return Err(Error::InvalidState(format!(
                "pre-blinded addressee {} needs a confidential ledger and an index",
                addressee.address
            )));
        }
        if !ctx.signer.supports_external_blinding() {
            return Err(BuildError::ExternalBlindingUnsupported.into());
        }
    }

    let resolved = ctx.wallet.resolve_address(&addressee.address)?;
    if network.is_confidential()
        && resolved.blinding_key.is_none()
        && !addressee.is_preblinded()
        && !record.is_redeposit
    {
        return Err(BuildError::NonConfidentialAddress.into());
    }
    addressee.script_pubkey = resolved.script_pubkey;
    if addressee.blinding_key.is_none() {
        addressee.blinding_key = resolved.blinding_key;
    }
    Ok(())
}

/// Reject a replacement that does not pay enough over the original
fn check_replacement_fee(
    network: &Network,
    record: &mut BuildRecord,
    tx: &RawTransaction,
) -> Result<()> {
    let vsize = vsize_from_weight(estimated_weight(network, tx)?) as u64;
    let old_fee = record.old_fee.unwrap_or(0);
    let old_fee_rate = record.old_fee_rate.unwrap_or(0);
    let min_fee = old_fee.saturating_add(vsize.saturating_mul(network.min_fee_rate) / 1000);
    let fee_rate = calculated_fee_rate(network.ledger, record.fee, vsize as usize)?;
    if record.fee < min_fee || fee_rate <= old_fee_rate {
        tracing::info!(
            "replacement fee {} (rate {}) does not beat {} (rate {})",
            record.fee,
            fee_rate,
            min_fee,
            old_fee_rate
        );
        record.set_error(BuildError::InvalidReplacementFeeRate);
    }
    Ok(())
}

/// Record weight, size, version, locktime and the fee rate of `tx`
pub fn update_tx_size_info(
    network: &Network,
    record: &mut BuildRecord,
    tx: &RawTransaction,
) -> Result<()> {
    let valid = tx.is_valid();
    let weight = if valid { estimated_weight(network, tx)? } else { 0 };
    let vsize = vsize_from_weight(weight);
    let fee_rate = if valid {
        calculated_fee_rate(network.ledger, record.fee, vsize)?
    } else {
        0
    };
    record.size = TxSizeInfo {
        weight,
        vsize,
        version: tx.version,
        lock_time: tx.lock_time,
        calculated_fee_rate: Some(fee_rate),
    };
    Ok(())
}

/// Describe every output of `tx` in `record.transaction_outputs`
pub fn update_tx_info(ctx: &BuildContext<'_>, record: &mut BuildRecord, tx: &RawTransaction) {
    record.transaction_outputs.clear();
    if !tx.is_valid() || record.has_error() {
        return;
    }
    let policy_asset = ctx.network.policy_asset;
    let mut plain = record.addressees.iter().filter(|a| !a.is_preblinded());
    let mut outputs = Vec::with_capacity(tx.outputs.len());

    for (i, output) in tx.outputs.iter().enumerate() {
        let asset = output.explicit_asset().unwrap_or(policy_asset);
        let mut info = OutputInfo {
            amount: output.explicit_value().unwrap_or(0),
            script_pubkey: output.script_pubkey.clone(),
            asset,
            is_change: false,
            is_fee: false,
            address: None,
            blinding_key: None,
            asset_blinder: None,
            amount_blinder: None,
            eph_public_key: None,
            blinding_nonce: None,
            is_preblinded: false,
        };

        if output.is_blinded() {
            if let Some(addressee) = record.addressees.iter().find(|a| a.index == Some(i)) {
                info.amount = addressee.amount;
                info.asset = addressee.asset_or(policy_asset);
                info.address = Some(addressee.address.clone());
                info.is_preblinded = true;
                if let Some(preblinded) = &addressee.preblinded {
                    info.asset_blinder = Some(preblinded.asset_blinder);
                    info.amount_blinder = preblinded.amount_blinder;
                    info.blinding_nonce = preblinded.blinding_nonce;
                }
            }
        } else if output.is_fee() {
            info.is_fee = true;
        } else if record.change_index_for(&asset) == Some(i) {
            info.is_change = true;
            if let Some(change) = record.change_address.get(&asset) {
                info.address = Some(change.address.clone());
                info.blinding_key = change.blinding_key;
            }
        } else if let Some(addressee) = plain.next() {
            info.address = Some(addressee.address.clone());
            info.blinding_key = addressee.blinding_key;
        }
        outputs.push(info);
    }
    record.transaction_outputs = outputs;
}
