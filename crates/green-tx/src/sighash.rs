//! Signature hashes for wallet inputs
//!
//! Three algorithms are in play: the legacy hash for pre-segwit inputs,
//! BIP143 for segwit inputs on the transparent ledger, and the Elements
//! variant of BIP143 (which adds issuance data and hashes confidential
//! values) on the confidential ledger. All three come from the
//! `SighashCache` of `bitcoin` and `elements`.

use crate::crypto::{SIGHASH_ALL, SIGHASH_SINGLE_ANYONECANPAY};
use crate::record::Utxo;
use crate::tx::{ConfidentialValue, RawTransaction};
use crate::{Error, Result};
use bitcoin::hashes::Hash;
use green_params::Ledger;

/// Reject sighash flags the wallet does not sign with.
///
/// SIGHASH_ALL is always accepted; SIGHASH_SINGLE|ANYONECANPAY only on the
/// confidential ledger, where it is used for swap proposals.
pub fn validate_sighash(ledger: Ledger, sighash: u32) -> Result<()> {
    match (ledger, sighash) {
        (_, SIGHASH_ALL) => Ok(()),
        (Ledger::Confidential, SIGHASH_SINGLE_ANYONECANPAY) => Ok(()),
        _ => Err(Error::UnsupportedSighash(sighash)),
    }
}

fn elements_sighash_type(sighash: u32) -> Result<elements::EcdsaSighashType> {
    match sighash {
        SIGHASH_ALL => Ok(elements::EcdsaSighashType::All),
        SIGHASH_SINGLE_ANYONECANPAY => Ok(elements::EcdsaSighashType::SinglePlusAnyoneCanPay),
        _ => Err(Error::UnsupportedSighash(sighash)),
    }
}

/// Hash signed by input `index` spending `utxo` with `script_code`
pub fn signature_hash(
    tx: &RawTransaction,
    index: usize,
    script_code: &[u8],
    utxo: &Utxo,
    sighash: u32,
) -> Result<[u8; 32]> {
    validate_sighash(tx.ledger, sighash)?;
    if index >= tx.inputs.len() {
        return Err(Error::InvalidState(format!(
            "sighash for input {} of {}",
            index,
            tx.inputs.len()
        )));
    }
    let segwit = utxo.address_type.is_segwit() && !utxo.is_external_key();
    if !segwit && sighash != SIGHASH_ALL {
        return Err(Error::UnsupportedSighash(sighash));
    }
    match tx.ledger {
        Ledger::Transparent => {
            let btx = tx.to_bitcoin()?;
            let mut cache = bitcoin::sighash::SighashCache::new(&btx);
            let script = bitcoin::Script::from_bytes(script_code);
            if segwit {
                let sighash_type = bitcoin::sighash::EcdsaSighashType::from_standard(sighash)
                    .map_err(|_| Error::UnsupportedSighash(sighash))?;
                let amount = bitcoin::Amount::from_sat(utxo.amount);
                let hash = cache
                    .p2wsh_signature_hash(index, script, amount, sighash_type)
                    .map_err(|e| Error::InvalidState(format!("sighash: {}", e)))?;
                Ok(hash.to_byte_array())
            } else {
                let hash = cache
                    .legacy_signature_hash(index, script, sighash)
                    .map_err(|e| Error::InvalidState(format!("sighash: {}", e)))?;
                Ok(hash.to_byte_array())
            }
        }
        Ledger::Confidential => {
            let etx = tx.to_elements()?;
            let mut cache = elements::sighash::SighashCache::new(&etx);
            let script = elements::Script::from(script_code.to_vec());
            let sighash_type = elements_sighash_type(sighash)?;
            let hash = if segwit {
                let value = match utxo.commitment {
                    Some(commitment) => ConfidentialValue::Confidential(commitment),
                    None => ConfidentialValue::Explicit(utxo.amount),
                };
                cache.segwitv0_sighash(index, &script, value.to_elements()?, sighash_type)
            } else {
                cache.legacy_sighash(index, &script, sighash_type)
            };
            Ok(hash.to_byte_array())
        }
    }
}
