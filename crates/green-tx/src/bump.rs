//! Fee bumping of a prior wallet transaction
//!
//! A replacement (RBF) replays the prior transaction: its outputs become
//! addressees again, one of them possibly recognised as change, and its
//! inputs become UTXOs that must be spent first. A child-pays-for-parent
//! (CPFP) bump instead spends one wallet output of the prior transaction
//! back to the wallet, charging the parent's fee shortfall on top.

use crate::address::AddressType;
use crate::blinding::unblind_output;
use crate::fees::{estimated_vsize, fee_for_vsize};
use crate::record::{Addressee, BuildRecord, PreviousTransaction, TxEndpoint, Utxo, WalletAddress};
use crate::script::csv_blocks;
use crate::session::{BuildContext, KeyLocator};
use crate::signatures::verify_input_signatures;
use crate::tx::RawTransaction;
use crate::{Error, Result};
use std::collections::BTreeSet;

/// How a prior transaction is bumped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpMode {
    /// Replace it
    Rbf,
    /// Spend one of its outputs with a higher fee
    Cpfp,
}

impl BumpMode {
    fn of(prev: &PreviousTransaction) -> Result<Self> {
        if prev.can_rbf {
            Ok(BumpMode::Rbf)
        } else if prev.can_cpfp {
            Ok(BumpMode::Cpfp)
        } else {
            Err(Error::NotBumpable(prev.txid.to_hex()))
        }
    }
}

fn locator(endpoint: &TxEndpoint) -> Result<KeyLocator> {
    match (endpoint.subaccount, endpoint.address_type) {
        (Some(subaccount), Some(address_type)) => Ok(KeyLocator {
            subaccount,
            pointer: endpoint.pointer,
            is_internal: endpoint.is_internal,
            address_type,
            subtype: endpoint.subtype,
        }),
        _ => Err(Error::InvalidState(format!(
            "wallet endpoint {} lacks subaccount or address type",
            endpoint.pt_idx
        ))),
    }
}

fn endpoint_utxo(ctx: &BuildContext<'_>, endpoint: &TxEndpoint, address_type: AddressType) -> Utxo {
    let asset = endpoint.asset.unwrap_or(ctx.network.policy_asset);
    let txid = Default::default();
    let mut utxo = Utxo::new(txid, endpoint.pt_idx, endpoint.amount, asset, address_type);
    utxo.subaccount = endpoint.subaccount.unwrap_or_default();
    utxo.pointer = endpoint.pointer;
    utxo.is_internal = endpoint.is_internal;
    utxo.subtype = endpoint.subtype;
    utxo
}

/// The locking script the wallet expects at a relevant endpoint
fn expected_script_pubkey(ctx: &BuildContext<'_>, locator: &KeyLocator) -> Result<Vec<u8>> {
    if locator.address_type.is_multisig() {
        let script = ctx.wallet.signing_script(locator)?;
        Ok(locator.address_type.script_pubkey(&script))
    } else {
        let keys = ctx.wallet.public_keys(locator)?;
        let key = keys
            .first()
            .ok_or_else(|| Error::Resolver("no public key for wallet output".to_string()))?;
        Ok(locator.address_type.script_pubkey(&key.serialize()))
    }
}

/// Prepare `record` for bumping its `previous_transaction`, if it has one.
///
/// `subaccounts` are the subaccounts the request touched before any bump
/// data was added; the prior transaction must involve one of them.
pub fn check_bump_tx(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    subaccounts: &BTreeSet<u32>,
) -> Result<()> {
    let Some(prev) = record.previous_transaction.clone() else {
        return Ok(());
    };
    let mode = BumpMode::of(&prev)?;
    record.is_rbf = mode == BumpMode::Rbf;
    record.is_cpfp = mode == BumpMode::Cpfp;

    let endpoints = match mode {
        BumpMode::Rbf => &prev.inputs,
        BumpMode::Cpfp => &prev.outputs,
    };
    let owned = endpoints
        .iter()
        .any(|e| e.is_relevant && e.subaccount.map_or(false, |s| subaccounts.contains(&s)));
    if !owned {
        return Err(Error::NoSubaccountUtxos);
    }

    let tx = ctx.wallet.raw_transaction(&prev.txid)?;
    record.old_fee = Some(prev.fee);
    record.old_fee_rate = Some(prev.fee_rate);
    tracing::info!(
        "bumping {} by {:?}: old fee {}, old rate {}",
        prev.txid,
        mode,
        prev.fee,
        prev.fee_rate
    );

    match mode {
        BumpMode::Cpfp => prepare_cpfp(ctx, record, &prev, &tx),
        BumpMode::Rbf => prepare_rbf(ctx, record, &prev, &tx),
    }
}

fn prepare_cpfp(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    prev: &PreviousTransaction,
    tx: &RawTransaction,
) -> Result<()> {
    let network = ctx.network;
    let fee_rate = record.fee_rate.unwrap_or(network.default_fee_rate);
    let parent_fee = fee_for_vsize(
        estimated_vsize(network, tx)?,
        ctx.fee_policy().effective_fee_rate(fee_rate),
    )?;
    record.network_fee = parent_fee.saturating_sub(prev.fee);
    record.is_redeposit = true;
    tracing::debug!("CPFP parent needs {}, pays {}", parent_fee, prev.fee);

    if record.utxos.values().all(Vec::is_empty) {
        let output = prev
            .outputs
            .iter()
            .find(|o| o.is_relevant)
            .ok_or_else(|| Error::InvalidState("CPFP parent has no wallet output".to_string()))?;
        let address_type = locator(output)?.address_type;
        let mut utxo = endpoint_utxo(ctx, output, address_type);
        utxo.txid = prev.txid;
        if network.is_confidential() {
            let unblinded = unblind_output(ctx, tx, output.pt_idx as usize)?.ok_or_else(|| {
                Error::InvalidState(format!("cannot unblind CPFP parent output {}", output.pt_idx))
            })?;
            utxo.amount = unblinded.value;
            utxo.asset = unblinded.asset;
            utxo.asset_blinder = Some(unblinded.asset_blinder);
            utxo.amount_blinder = Some(unblinded.amount_blinder);
            utxo.commitment = unblinded.commitment;
        }
        record.utxos.insert(utxo.asset, vec![utxo]);
    }
    Ok(())
}

fn prepare_rbf(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    prev: &PreviousTransaction,
    tx: &RawTransaction,
) -> Result<()> {
    let network = ctx.network;
    let policy_asset = network.policy_asset;
    if tx.outputs.len() != prev.outputs.len() {
        return Err(Error::InvalidState(format!(
            "prior transaction has {} outputs, history lists {}",
            tx.outputs.len(),
            prev.outputs.len()
        )));
    }

    // Single-sig wallets mark change explicitly; multisig wallets do not
    let single_sig = ctx.wallet.is_single_sig();
    let have_explicit_change =
        single_sig && prev.outputs.iter().any(|o| o.is_relevant && o.is_internal);

    let mut addressees = Vec::with_capacity(prev.outputs.len());
    let mut change: Option<&TxEndpoint> = None;
    for (output, txout) in prev.outputs.iter().zip(&tx.outputs) {
        if !output.address.is_empty() {
            let resolved = ctx.wallet.resolve_address(&output.address)?;
            if resolved.script_pubkey != txout.script_pubkey {
                return Err(Error::InvalidState(format!(
                    "output {} does not pay {}",
                    output.pt_idx, output.address
                )));
            }
        }
        if output.is_relevant {
            let expected = expected_script_pubkey(ctx, &locator(output)?)?;
            if expected != txout.script_pubkey {
                return Err(Error::InvalidState(format!(
                    "output {} is not the wallet script it claims",
                    output.pt_idx
                )));
            }
        }

        let is_change = output.is_relevant
            && change.is_none()
            && (!single_sig || !have_explicit_change || output.is_internal);
        if is_change {
            change = Some(output);
        } else {
            addressees.push(endpoint_addressee(output));
        }
    }

    record.is_redeposit = false;
    record.change_index.remove(&policy_asset);
    match change {
        Some(output) if addressees.is_empty() => {
            addressees.push(endpoint_addressee(output));
            record.is_redeposit = true;
            record.change_subaccount = output.subaccount;
        }
        Some(output) => {
            let loc = locator(output)?;
            let resolved = ctx.wallet.resolve_address(&output.address)?;
            let address = WalletAddress {
                address: output.address.clone(),
                script_pubkey: resolved.script_pubkey,
                blinding_key: resolved.blinding_key,
                subaccount: loc.subaccount,
                pointer: loc.pointer,
                is_internal: loc.is_internal,
                address_type: loc.address_type,
                user_path: ctx.wallet.user_path(&loc)?,
            };
            record.change_address.insert(policy_asset, address);
            record.change_index.insert(policy_asset, output.pt_idx as usize);
            record.change_subaccount = output.subaccount;
        }
        None => {
            if let Some(input) = prev.inputs.iter().find(|i| i.is_relevant) {
                record.subaccount = input.subaccount;
                record.change_subaccount = input.subaccount;
            }
        }
    }
    tracing::debug!(
        "replaying {} addressees, change {:?}, redeposit {}",
        addressees.len(),
        change.map(|c| c.pt_idx),
        record.is_redeposit
    );
    record.addressees = addressees;

    if record.old_used_utxos.is_empty() {
        record.old_used_utxos = replay_inputs(ctx, prev, tx)?;
    }
    if record.memo.is_empty() {
        record.memo = prev.memo.clone();
    }

    for (vin, utxo) in record.old_used_utxos.iter_mut().enumerate() {
        let index = tx.find_input(&utxo.outpoint()).unwrap_or(vin);
        utxo.user_sighash = Some(verify_input_signatures(tx, index, utxo)?);
    }
    Ok(())
}

fn endpoint_addressee(output: &TxEndpoint) -> Addressee {
    let mut addressee = Addressee::new(output.address.clone(), output.amount);
    addressee.asset = output.asset;
    addressee
}

/// Rebuild the prior transaction's inputs as UTXOs, in input order
fn replay_inputs(
    ctx: &BuildContext<'_>,
    prev: &PreviousTransaction,
    tx: &RawTransaction,
) -> Result<Vec<Utxo>> {
    let mut inputs: Vec<&TxEndpoint> = prev.inputs.iter().collect();
    inputs.sort_by_key(|i| i.pt_idx);
    if inputs.len() != tx.inputs.len() {
        return Err(Error::InvalidState(format!(
            "prior transaction has {} inputs, history lists {}",
            tx.inputs.len(),
            inputs.len()
        )));
    }

    let mut utxos = Vec::with_capacity(inputs.len());
    for input in inputs {
        if !input.is_relevant {
            return Err(Error::InvalidState(format!(
                "input {} is not from this wallet",
                input.pt_idx
            )));
        }
        let txin = tx.inputs.get(input.pt_idx as usize).ok_or_else(|| {
            Error::InvalidState(format!("no input {} in prior transaction", input.pt_idx))
        })?;
        let address_type = locator(input)?.address_type;
        let mut utxo = endpoint_utxo(ctx, input, address_type);
        utxo.txid = txin.previous_output.txid;
        utxo.vout = txin.previous_output.vout;
        utxo.sequence = Some(txin.sequence);

        if address_type == AddressType::Csv {
            // The timelock actually used, not the wallet's current setting
            let script = txin.witness.last().ok_or_else(|| {
                Error::InvalidState(format!("CSV input {} has no witness", input.pt_idx))
            })?;
            let blocks = csv_blocks(script)?;
            if !ctx.network.is_csv_bucket(blocks) {
                return Err(Error::InvalidState(format!(
                    "CSV input {} uses {} blocks",
                    input.pt_idx, blocks
                )));
            }
            utxo.subtype = blocks;
        }

        let loc = KeyLocator::from(&utxo);
        if address_type.is_multisig() {
            utxo.prevout_script = ctx.wallet.signing_script(&loc)?;
        } else {
            let keys = ctx.wallet.public_keys(&loc)?;
            let key = keys
                .first()
                .ok_or_else(|| Error::Resolver("no public key for wallet input".to_string()))?;
            utxo.public_key = Some(key.serialize().to_vec());
        }
        utxo.user_path = Some(ctx.wallet.user_path(&loc)?);
        utxos.push(utxo);
    }
    Ok(utxos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockWallet;
    use crate::tx::Txid;
    use green_params::Network;

    fn previous(can_rbf: bool, can_cpfp: bool) -> PreviousTransaction {
        PreviousTransaction {
            txid: Txid::from_bytes([4; 32]),
            can_rbf,
            can_cpfp,
            fee: 500,
            fee_rate: 1_000,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_previous_transaction_is_noop() {
        let network = Network::bitcoin();
        let wallet = MockWallet::multisig(&network);
        let mut record = BuildRecord::default();
        check_bump_tx(&wallet.context(), &mut record, &BTreeSet::new()).unwrap();
        assert!(!record.is_rbf && !record.is_cpfp);
    }

    #[test]
    fn test_confirmed_transaction_is_not_bumpable() {
        let network = Network::bitcoin();
        let wallet = MockWallet::multisig(&network);
        let mut record = BuildRecord::default();
        record.previous_transaction = Some(previous(false, false));
        let result = check_bump_tx(&wallet.context(), &mut record, &BTreeSet::from([0]));
        assert!(matches!(result, Err(Error::NotBumpable(_))));
    }

    #[test]
    fn test_foreign_subaccount_is_rejected() {
        let network = Network::bitcoin();
        let wallet = MockWallet::multisig(&network);
        let mut prev = previous(true, false);
        prev.inputs.push(TxEndpoint {
            is_relevant: true,
            subaccount: Some(1),
            address_type: Some(AddressType::P2wsh),
            ..Default::default()
        });
        let mut record = BuildRecord::default();
        record.previous_transaction = Some(prev);
        let result = check_bump_tx(&wallet.context(), &mut record, &BTreeSet::from([0]));
        assert!(matches!(result, Err(Error::NoSubaccountUtxos)));
    }

    #[test]
    fn test_rbf_takes_precedence() {
        assert_eq!(BumpMode::of(&previous(true, true)).unwrap(), BumpMode::Rbf);
        assert_eq!(BumpMode::of(&previous(false, true)).unwrap(), BumpMode::Cpfp);
    }
}
