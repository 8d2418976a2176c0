//! Signing a built transaction

use crate::create::update_tx_size_info;
use crate::crypto::{der_with_sighash, sign_hash, SECP, SIGHASH_ALL};
use crate::record::{BuildRecord, Utxo};
use crate::script::p2pkh_script_sig;
use crate::session::{BuildContext, KeyLocator};
use crate::sighash::{signature_hash, validate_sighash};
use crate::spend::{add_input_signature, input_script_code};
use crate::{Error, Result};
use secp256k1::{PublicKey, SecretKey};

/// The UTXO spent by each input of `record.transaction`, in input order.
///
/// Replaced inputs are matched first, then newly selected ones. A record
/// carrying an error is refused.
pub fn get_signing_inputs(record: &BuildRecord) -> Result<Vec<Utxo>> {
    if let Some(error) = record.error() {
        return Err(Error::Build(error.clone()));
    }
    let tx = record
        .transaction
        .as_ref()
        .ok_or_else(|| Error::InvalidState("no transaction to sign".to_string()))?;

    tx.inputs
        .iter()
        .map(|input| {
            record
                .old_used_utxos
                .iter()
                .chain(&record.used_utxos)
                .find(|u| u.outpoint() == input.previous_output)
                .cloned()
                .ok_or_else(|| {
                    Error::InvalidState(format!(
                        "input {}:{} has no matching UTXO",
                        input.previous_output.txid, input.previous_output.vout
                    ))
                })
        })
        .collect()
}

/// Sign every input of `record.transaction` the wallet can sign.
///
/// Returns the DER signature (with sighash byte) placed in each input;
/// `None` for inputs left unsigned or carrying their own scripts.
pub fn sign_transaction(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
) -> Result<Vec<Option<Vec<u8>>>> {
    let inputs = get_signing_inputs(record)?;
    if ctx.network.is_confidential() && !record.is_partial && !record.is_blinded {
        return Err(Error::InvalidState(
            "confidential transactions are signed after blinding".to_string(),
        ));
    }
    let mut tx = record
        .transaction
        .clone()
        .ok_or_else(|| Error::InvalidState("no transaction to sign".to_string()))?;

    let mut signatures = Vec::with_capacity(inputs.len());
    for (index, utxo) in inputs.iter().enumerate() {
        if utxo.skip_signing || utxo.is_presigned() {
            signatures.push(None);
            continue;
        }
        let sighash = utxo.user_sighash.unwrap_or(SIGHASH_ALL);
        validate_sighash(ctx.network.ledger, sighash)?;
        let script_code = input_script_code(utxo)?;
        let hash = signature_hash(&tx, index, &script_code, utxo, sighash)?;

        let der = if let Some(secret) = utxo.private_key {
            let key = SecretKey::from_slice(&secret)
                .map_err(|e| Error::InvalidKey(format!("sweep key: {}", e)))?;
            let signature = sign_hash(&key, &hash, ctx.signer.supports_low_r())?;
            let der = der_with_sighash(&signature, sighash)?;
            let public_key = match &utxo.public_key {
                Some(public_key) => public_key.clone(),
                None => PublicKey::from_secret_key(&SECP, &key).serialize().to_vec(),
            };
            let input = &mut tx.inputs[index];
            input.script_sig = p2pkh_script_sig(&der, &public_key)?;
            input.witness.clear();
            der
        } else {
            let path = match &utxo.user_path {
                Some(path) => path.clone(),
                None => ctx.wallet.user_path(&KeyLocator::from(utxo))?,
            };
            let der = der_with_sighash(&ctx.signer.sign_hash(&path, &hash)?, sighash)?;
            add_input_signature(&mut tx, index, utxo, &der)?;
            der
        };
        signatures.push(Some(der));
    }

    tracing::debug!(
        "signed {} of {} inputs",
        signatures.iter().filter(|s| s.is_some()).count(),
        signatures.len()
    );
    update_tx_size_info(ctx.network, record, &tx)?;
    record.transaction = Some(tx);
    Ok(signatures)
}
