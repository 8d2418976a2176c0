//! Reading signatures back out of signed inputs

use crate::crypto::{parse_der_with_sighash, verify_hash};
use crate::record::Utxo;
use crate::script::{is_optimized_csv, parse_pushes};
use crate::sighash::signature_hash;
use crate::spend::{template_public_keys, SpendTemplate};
use crate::tx::{RawTransaction, TxIn};
use crate::{Error, Result};
use secp256k1::ecdsa::Signature;

/// Signatures in a signed input with their sighash flags.
///
/// Multisig inputs yield `[service, user]`, single-key inputs `[user]`.
pub fn get_signatures_from_input(utxo: &Utxo, input: &TxIn) -> Result<Vec<(Signature, u32)>> {
    let raw: Vec<Vec<u8>> = match SpendTemplate::for_utxo(utxo)? {
        SpendTemplate::External { .. } | SpendTemplate::SingleSigLegacy { .. } => {
            let pushes = parse_pushes(&input.script_sig)?;
            match pushes.first() {
                Some(sig) => vec![sig.clone()],
                None => return Err(Error::Encoding("empty p2pkh scriptSig".to_string())),
            }
        }
        SpendTemplate::SingleSigSegwitWrapped { .. }
        | SpendTemplate::SingleSigSegwitNative { .. } => {
            if input.witness.len() != 2 {
                return Err(Error::Encoding(format!(
                    "p2wpkh witness has {} items",
                    input.witness.len()
                )));
            }
            vec![input.witness[0].clone()]
        }
        SpendTemplate::MultisigLegacy { .. } => {
            let pushes = parse_pushes(&input.script_sig)?;
            if pushes.len() < 4 {
                return Err(Error::Encoding(format!(
                    "multisig scriptSig has {} pushes",
                    pushes.len()
                )));
            }
            vec![pushes[1].clone(), pushes[2].clone()]
        }
        template @ (SpendTemplate::MultisigSegwit { .. } | SpendTemplate::MultisigCsv { .. }) => {
            let n = input.witness.len();
            if n < 3 {
                return Err(Error::Encoding(format!("multisig witness has {} items", n)));
            }
            let (mut service, mut user) = (&input.witness[n - 3], &input.witness[n - 2]);
            // Legacy CSV inputs carry the user signature first
            let user_first = matches!(template, SpendTemplate::MultisigCsv { .. })
                && !is_optimized_csv(&input.witness[n - 1]);
            if user_first {
                std::mem::swap(&mut service, &mut user);
            }
            vec![service.clone(), user.clone()]
        }
    };
    raw.iter().map(|der| parse_der_with_sighash(der)).collect()
}

/// Check every signature on input `index` of `tx` against the keys of
/// `utxo`, returning the sighash flag the user signed with
pub fn verify_input_signatures(tx: &RawTransaction, index: usize, utxo: &Utxo) -> Result<u32> {
    let input = tx
        .inputs
        .get(index)
        .ok_or_else(|| Error::InvalidState(format!("no input {} to verify", index)))?;
    let template = SpendTemplate::for_utxo(utxo)?;
    let keys = template_public_keys(&template)?;
    let signatures = get_signatures_from_input(utxo, input)?;
    if signatures.len() != keys.len() {
        return Err(Error::SignatureMismatch { input: index });
    }

    let script_code = template.script_code();
    let mut user_sighash = 0;
    for ((signature, sighash), key) in signatures.iter().zip(&keys) {
        let hash = signature_hash(tx, index, &script_code, utxo, *sighash)?;
        if !verify_hash(key, &hash, signature) {
            tracing::warn!("signature {} on input {} does not verify", sighash, index);
            return Err(Error::SignatureMismatch { input: index });
        }
        user_sighash = *sighash;
    }
    Ok(user_sighash)
}
