//! Confidential blinding of a built transaction
//!
//! Blinding happens in two steps. [`get_blinding_factors`] derives asset and
//! value blinders for the wallet's own outputs from a master blinding key;
//! the factors may be handed to another party (a signing device, a swap
//! counterparty) before [`blind_transaction`] turns every output into
//! commitments, computing the last value blinder so that input and output
//! commitments balance.

use crate::confidential::RangeproofRequest;
use crate::create::update_tx_size_info;
use crate::crypto::{
    ecdh_nonce, hmac_sha256, public_key, random_bytes, random_secret_key, scalar_add, sha256d,
    SECP, ZERO_SCALAR,
};
use crate::record::{BuildRecord, Utxo};
use crate::session::BuildContext;
use crate::tx::{ConfidentialAsset, ConfidentialNonce, ConfidentialValue, RawTransaction, TxOut};
use crate::{Error, Result};
use green_params::AssetId;
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Per-output blinders; `None` where an output needs none from the wallet
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlindingFactors {
    /// Asset blinding factors, one per output
    #[serde(rename = "assetblinders", with = "hex_blinders")]
    pub asset_blinders: Vec<Option<[u8; 32]>>,
    /// Value blinding factors, one per output
    #[serde(rename = "amountblinders", with = "hex_blinders")]
    pub amount_blinders: Vec<Option<[u8; 32]>>,
}

impl BlindingFactors {
    fn asset_blinder(&self, index: usize) -> Option<[u8; 32]> {
        self.asset_blinders.get(index).copied().flatten()
    }

    fn amount_blinder(&self, index: usize) -> Option<[u8; 32]> {
        self.amount_blinders.get(index).copied().flatten()
    }
}

mod hex_blinders {
    use super::*;

    pub fn serialize<S: Serializer>(
        blinders: &[Option<[u8; 32]>],
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        let encoded: Vec<String> = blinders
            .iter()
            .map(|b| b.map(hex::encode).unwrap_or_default())
            .collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Vec<Option<[u8; 32]>>, D::Error> {
        let encoded = Vec::<String>::deserialize(deserializer)?;
        encoded
            .iter()
            .map(|s| {
                if s.is_empty() {
                    return Ok(None);
                }
                let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
                <[u8; 32]>::try_from(bytes.as_slice())
                    .map(Some)
                    .map_err(|_| serde::de::Error::custom("blinder must be 32 bytes"))
            })
            .collect()
    }
}

/// An output opened with the wallet's blinding key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnblindedOutput {
    /// Value
    pub value: u64,
    /// Asset
    pub asset: AssetId,
    /// Asset blinding factor; zero for explicit outputs
    pub asset_blinder: [u8; 32],
    /// Value blinding factor; zero for explicit outputs
    pub amount_blinder: [u8; 32],
    /// Value commitment; absent for explicit outputs
    pub commitment: Option<[u8; 33]>,
}

/// UTXOs spent by the record's transaction, in input order. Without a
/// transaction, replaced inputs come first, then new ones.
fn spent_utxos(record: &BuildRecord) -> Vec<&Utxo> {
    let all = record.old_used_utxos.iter().chain(record.used_utxos.iter());
    match &record.transaction {
        Some(tx) => tx
            .inputs
            .iter()
            .filter_map(|input| all.clone().find(|u| u.outpoint() == input.previous_output))
            .collect(),
        None => all.collect(),
    }
}

/// Double SHA-256 of the outpoints the transaction spends
pub fn hash_prevouts(utxos: &[&Utxo]) -> [u8; 32] {
    let mut data = Vec::with_capacity(utxos.len() * 36);
    for utxo in utxos {
        data.extend_from_slice(utxo.txid.as_bytes());
        data.extend_from_slice(&utxo.vout.to_le_bytes());
    }
    sha256d(&data)
}

fn derive_blinder(
    master_key: &[u8],
    tag: &[u8],
    hash_prevouts: &[u8; 32],
    index: usize,
) -> [u8; 32] {
    hmac_sha256(master_key, &[tag, hash_prevouts, &(index as u32).to_le_bytes()])
}

/// Derive blinders for the outputs the wallet blinds.
///
/// Factors depend only on the master key, the spent outpoints and the
/// output position, so repeated calls agree. The value blinder of the
/// last non-fee output is left out of complete transactions; blinding
/// computes it to balance the commitments.
pub fn get_blinding_factors(master_key: &[u8], record: &BuildRecord) -> Result<BlindingFactors> {
    let prevouts = hash_prevouts(&spent_utxos(record));
    let outputs = &record.transaction_outputs;
    let last_non_fee = outputs.iter().rposition(|o| !o.is_fee);

    let mut factors = BlindingFactors {
        asset_blinders: Vec::with_capacity(outputs.len()),
        amount_blinders: Vec::with_capacity(outputs.len()),
    };
    for (i, output) in outputs.iter().enumerate() {
        if output.blinding_key.is_none() {
            factors.asset_blinders.push(None);
            factors.amount_blinders.push(None);
            continue;
        }
        factors
            .asset_blinders
            .push(Some(derive_blinder(master_key, b"abf", &prevouts, i)));
        let vbf = if record.is_partial || Some(i) != last_non_fee {
            Some(derive_blinder(master_key, b"vbf", &prevouts, i))
        } else {
            None
        };
        factors.amount_blinders.push(vbf);
    }
    Ok(factors)
}

/// Commitments and blinders contributed by the spent inputs
#[derive(Default)]
struct InputBlinding {
    assets: Vec<AssetId>,
    generators: Vec<[u8; 33]>,
    all_abfs: Vec<[u8; 32]>,
    values: Vec<u64>,
    abfs: Vec<[u8; 32]>,
    vbfs: Vec<[u8; 32]>,
    num_inputs: usize,
}

/// Replace every non-fee output of `record.transaction` with commitments
/// and proofs.
///
/// `factors` supplies the blinders of wallet outputs, typically from
/// [`get_blinding_factors`]. A record carrying an error is refused.
pub fn blind_transaction(
    ctx: &BuildContext<'_>,
    record: &mut BuildRecord,
    factors: &BlindingFactors,
) -> Result<()> {
    if let Some(error) = record.error() {
        tracing::debug!("refusing to blind a record with error: {}", error);
        return Err(Error::Build(error.clone()));
    }
    let network = ctx.network;
    if !network.is_confidential() {
        return Err(Error::InvalidState("blinding requires a confidential ledger".to_string()));
    }
    let mut tx = record
        .transaction
        .clone()
        .ok_or_else(|| Error::InvalidState("no transaction to blind".to_string()))?;
    let mut outputs = record.transaction_outputs.clone();
    let is_partial = record.is_partial;
    let count = outputs.len();

    let min_outputs = if is_partial { 1 } else { 2 };
    if count < min_outputs || count != tx.outputs.len() {
        return Err(Error::InvalidState(format!(
            "cannot blind {} described outputs of {}",
            count,
            tx.outputs.len()
        )));
    }
    let num_fees = outputs.iter().filter(|o| o.is_fee).count();
    let fee_last = outputs.last().map_or(false, |o| o.is_fee);
    if (is_partial && num_fees != 0) || (!is_partial && (num_fees != 1 || !fee_last)) {
        return Err(Error::InvalidState(format!(
            "{} fee outputs (last is fee: {}) in a {} transaction",
            num_fees,
            fee_last,
            if is_partial { "partial" } else { "complete" }
        )));
    }

    let primitives = ctx.primitives;
    let min_bits = u8::try_from(network.ct_bits)
        .map_err(|_| Error::InvalidState(format!("range proof over {} bits", network.ct_bits)))?;
    let mut inputs = InputBlinding::default();
    for utxo in spent_utxos(record) {
        let abf = utxo.asset_blinder.unwrap_or(ZERO_SCALAR);
        inputs.assets.push(utxo.asset);
        inputs.generators.push(primitives.asset_generator(&utxo.asset, &abf)?);
        inputs.all_abfs.push(abf);
        // Inputs without a value blinder are covered by the scalar offsets
        if let Some(vbf) = utxo.amount_blinder {
            inputs.values.push(utxo.amount);
            inputs.abfs.push(abf);
            inputs.vbfs.push(vbf);
            inputs.num_inputs += 1;
        }
    }
    if inputs.num_inputs == 0 {
        return Err(Error::InvalidState("no input with a known value blinder".to_string()));
    }

    let nonces_required = record.blinding_nonces_required;
    let mut nonces: Vec<Option<[u8; 32]>> = Vec::with_capacity(count);
    let num_preblinded = record.addressees.iter().filter(|a| a.is_preblinded()).count();
    let InputBlinding {
        assets: input_assets,
        generators: input_generators,
        all_abfs: input_abfs,
        mut values,
        mut abfs,
        mut vbfs,
        num_inputs,
    } = inputs;

    for (i, info) in outputs.iter_mut().enumerate() {
        if info.is_fee {
            continue;
        }
        let is_ours = info.blinding_key.is_some();
        let partially_blinded = info.asset_blinder.is_some();
        let fully_blinded = partially_blinded && info.amount_blinder.is_some();
        let for_final_vbf = fully_blinded || is_ours;
        if is_ours && partially_blinded {
            return Err(Error::InvalidState(format!("output {} is already blinded", i)));
        }
        if !is_ours && !partially_blinded {
            return Err(Error::InvalidState(format!(
                "output {} has no blinding key or asset blinder",
                i
            )));
        }
        if for_final_vbf {
            values.push(info.amount);
        }

        let abf = match info.asset_blinder {
            Some(abf) => abf,
            None => factors
                .asset_blinder(i)
                .ok_or_else(|| Error::InvalidState(format!("no asset blinder for output {}", i)))?,
        };
        if for_final_vbf {
            info.asset_blinder = Some(abf);
            abfs.push(abf);
        }

        let vbf = if is_partial || i + 2 < count {
            match (for_final_vbf, info.amount_blinder.or_else(|| factors.amount_blinder(i))) {
                (true, Some(vbf)) => vbf,
                (true, None) => {
                    return Err(Error::InvalidState(format!("no value blinder for output {}", i)))
                }
                (false, _) => ZERO_SCALAR,
            }
        } else {
            if !for_final_vbf {
                return Err(Error::InvalidState(format!("final output {} cannot balance", i)));
            }
            let mut vbf = primitives.final_vbf(&values, num_inputs, &abfs, &vbfs)?;
            if !record.scalars.is_empty() {
                // One offset per pre-blinded addressee, no more
                if record.scalars.len() != num_preblinded {
                    return Err(Error::InvalidState(format!(
                        "{} scalars for {} pre-blinded addressees",
                        record.scalars.len(),
                        num_preblinded
                    )));
                }
                for scalar in &record.scalars {
                    vbf = scalar_add(&vbf, scalar)?;
                }
            }
            vbf
        };
        if for_final_vbf {
            info.amount_blinder = Some(vbf);
            vbfs.push(vbf);
        }

        let output = &tx.outputs[i];
        let script_pubkey = output.script_pubkey.clone();
        let generator = primitives.asset_generator(&info.asset, &abf)?;
        let value_commitment = if for_final_vbf {
            primitives.value_commitment(info.amount, &vbf, &generator)?
        } else {
            match output.value {
                ConfidentialValue::Confidential(commitment) => commitment,
                _ => {
                    return Err(Error::InvalidState(format!(
                        "pre-blinded output {} has no commitment",
                        i
                    )))
                }
            }
        };

        let reusable = output.is_blinded()
            && output.asset == ConfidentialAsset::Confidential(generator)
            && output.value == ConfidentialValue::Confidential(value_commitment);
        let (nonce_commitment, range_proof) = match (reusable, output.nonce) {
            (true, ConfidentialNonce::Confidential(nonce)) => {
                if nonces_required {
                    let nonce = info.blinding_nonce.ok_or_else(|| {
                        Error::InvalidState(format!(
                            "pre-blinded output {} has no blinding nonce",
                            i
                        ))
                    })?;
                    nonces.push(Some(nonce));
                }
                (nonce, output.range_proof.clone())
            }
            _ => {
                let blinding_key = info.blinding_key.ok_or_else(|| {
                    Error::InvalidState(format!("output {} has no blinding key", i))
                })?;
                let blinding_pubkey = public_key(&blinding_key)?;
                let eph_secret = random_secret_key();
                let eph_public = PublicKey::from_secret_key(&SECP, &eph_secret).serialize();
                info.eph_public_key = Some(eph_public);
                if nonces_required {
                    nonces.push(Some(ecdh_nonce(&blinding_pubkey, &eph_secret)));
                }
                let range_proof = primitives.rangeproof(&RangeproofRequest {
                    value: info.amount,
                    blinding_pubkey: &blinding_pubkey,
                    eph_secret: &eph_secret,
                    asset: &info.asset,
                    abf: &abf,
                    vbf: &vbf,
                    commitment: &value_commitment,
                    script_pubkey: &script_pubkey,
                    generator: &generator,
                    exp: network.ct_exponent,
                    min_bits,
                })?;
                (eph_public, range_proof)
            }
        };

        let surjection_proof = if is_partial {
            Vec::new()
        } else {
            primitives.surjection_proof(
                &info.asset,
                &abf,
                &generator,
                &random_bytes(),
                &input_assets,
                &input_abfs,
                &input_generators,
            )?
        };

        tx.outputs[i] = TxOut {
            value: ConfidentialValue::Confidential(value_commitment),
            asset: ConfidentialAsset::Confidential(generator),
            nonce: ConfidentialNonce::Confidential(nonce_commitment),
            script_pubkey,
            surjection_proof,
            range_proof,
        };
    }

    record.is_blinded = true;
    if nonces_required {
        if !is_partial {
            // The fee output has no nonce
            nonces.push(None);
        }
        record.blinding_nonces = nonces;
    }
    record.transaction_outputs = outputs;
    tracing::info!("blinded {} outputs over {} inputs", count - num_fees, input_assets.len());
    update_tx_size_info(network, record, &tx)?;
    record.transaction = Some(tx);
    Ok(())
}

/// Open output `index` of `tx` with the wallet's blinding key.
///
/// Explicit outputs report zero blinders. `None` means the output is
/// blinded to a key the wallet does not hold.
pub fn unblind_output(
    ctx: &BuildContext<'_>,
    tx: &RawTransaction,
    index: usize,
) -> Result<Option<UnblindedOutput>> {
    if !ctx.network.is_confidential() {
        return Err(Error::InvalidState("unblinding requires a confidential ledger".to_string()));
    }
    let output = tx
        .outputs
        .get(index)
        .ok_or_else(|| Error::InvalidState(format!("no output {} to unblind", index)))?;

    match (output.value, output.asset, output.nonce) {
        (ConfidentialValue::Explicit(value), ConfidentialAsset::Explicit(asset), _) => {
            Ok(Some(UnblindedOutput {
                value,
                asset,
                asset_blinder: ZERO_SCALAR,
                amount_blinder: ZERO_SCALAR,
                commitment: None,
            }))
        }
        (
            ConfidentialValue::Confidential(value_commitment),
            ConfidentialAsset::Confidential(asset_commitment),
            ConfidentialNonce::Confidential(nonce),
        ) => {
            let blinding_key = ctx.signer.blinding_key_from_script(&output.script_pubkey)?;
            match ctx.primitives.unblind(
                &blinding_key,
                &nonce,
                &output.range_proof,
                &value_commitment,
                &output.script_pubkey,
                &asset_commitment,
            ) {
                Ok(unblinded) => Ok(Some(UnblindedOutput {
                    value: unblinded.value,
                    asset: unblinded.asset,
                    asset_blinder: unblinded.asset_blinder,
                    amount_blinder: unblinded.amount_blinder,
                    commitment: Some(value_commitment),
                })),
                Err(e) => {
                    tracing::warn!("failed to unblind output {}: {}", index, e);
                    Ok(None)
                }
            }
        }
        _ => Err(Error::MalformedConfidentialOutput(index)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::OutputInfo;
    use crate::tx::Txid;

    fn output(blinding_key: Option<[u8; 33]>, is_fee: bool) -> OutputInfo {
        OutputInfo {
            amount: 1_000,
            script_pubkey: if is_fee { Vec::new() } else { vec![0x51] },
            asset: AssetId::from_bytes([1; 32]),
            is_change: false,
            is_fee,
            address: None,
            blinding_key,
            asset_blinder: None,
            amount_blinder: None,
            eph_public_key: None,
            blinding_nonce: None,
            is_preblinded: false,
        }
    }

    fn record() -> BuildRecord {
        let mut record = BuildRecord::default();
        record.used_utxos = vec![Utxo::new(
            Txid::from_bytes([8; 32]),
            1,
            5_000,
            AssetId::from_bytes([1; 32]),
            crate::address::AddressType::P2wpkh,
        )];
        record.transaction_outputs = vec![
            output(Some([2; 33]), false),
            output(Some([2; 33]), false),
            output(None, true),
        ];
        record
    }

    #[test]
    fn test_factors_are_deterministic() {
        let record = record();
        let a = get_blinding_factors(b"master", &record).unwrap();
        let b = get_blinding_factors(b"master", &record).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, get_blinding_factors(b"other", &record).unwrap());
    }

    #[test]
    fn test_final_value_blinder_is_left_out() {
        let mut record = record();
        let factors = get_blinding_factors(b"master", &record).unwrap();
        assert!(factors.asset_blinders[0].is_some() && factors.asset_blinders[1].is_some());
        assert!(factors.amount_blinders[0].is_some());
        assert!(factors.amount_blinders[1].is_none());
        assert!(factors.asset_blinders[2].is_none());

        record.is_partial = true;
        record.transaction_outputs.pop();
        let factors = get_blinding_factors(b"master", &record).unwrap();
        assert!(factors.amount_blinders.iter().all(Option::is_some));
    }

    #[test]
    fn test_factors_follow_inputs() {
        let mut record = record();
        let before = get_blinding_factors(b"master", &record).unwrap();
        record.used_utxos[0].vout = 2;
        assert_ne!(before, get_blinding_factors(b"master", &record).unwrap());
    }

    #[test]
    fn test_factors_json() {
        let factors = get_blinding_factors(b"master", &record()).unwrap();
        let json = serde_json::to_value(&factors).unwrap();
        assert_eq!(json["amountblinders"][1], "");
        assert_eq!(json["assetblinders"][0].as_str().unwrap().len(), 64);
        let back: BlindingFactors = serde_json::from_value(json).unwrap();
        assert_eq!(back, factors);
    }
}
