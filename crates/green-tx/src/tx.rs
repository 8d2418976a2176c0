//! Raw transaction model
//!
//! One structure serves both ledgers: on a transparent ledger outputs carry
//! an explicit value and no asset; on a confidential ledger every output has
//! an asset, a value and a nonce that are either explicit or committed, plus
//! optional surjection and range proofs in the witness section.
//!
//! Consensus encoding, txids and weights come from `bitcoin::Transaction`
//! and `elements::Transaction`; [`RawTransaction`] converts to and from them.

use crate::{Error, Result};
use bitcoin::hashes::Hash;
use elements::confidential;
use elements::secp256k1_zkp::{RangeProof, SurjectionProof};
use green_params::{AssetId, Ledger};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Transaction version used for new transactions
pub const TX_VERSION_2: u32 = 2;

/// Transaction hash, held in serialization (internal) byte order
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid([u8; 32]);

impl Txid {
    /// From internal-order bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Internal-order bytes
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse the display (byte-reversed) hex form
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::Encoding(format!("txid {}: {}", s, e)))?;
        bytes.reverse();
        Ok(Self(bytes))
    }

    /// Display (byte-reversed) hex form
    pub fn to_hex(&self) -> String {
        let mut bytes = self.0;
        bytes.reverse();
        hex::encode(bytes)
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({})", self.to_hex())
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl From<bitcoin::Txid> for Txid {
    fn from(txid: bitcoin::Txid) -> Self {
        Self(txid.to_byte_array())
    }
}

impl From<elements::Txid> for Txid {
    fn from(txid: elements::Txid) -> Self {
        Self(txid.to_byte_array())
    }
}

impl From<Txid> for bitcoin::Txid {
    fn from(txid: Txid) -> Self {
        bitcoin::Txid::from_byte_array(txid.0)
    }
}

impl From<Txid> for elements::Txid {
    fn from(txid: Txid) -> Self {
        elements::Txid::from_byte_array(txid.0)
    }
}

/// Reference to a previous transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Funding transaction
    pub txid: Txid,
    /// Output index in the funding transaction
    pub vout: u32,
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Output being spent
    pub previous_output: OutPoint,
    /// Unlocking script
    pub script_sig: Vec<u8>,
    /// Sequence number
    pub sequence: u32,
    /// Witness stack
    pub witness: Vec<Vec<u8>>,
}

/// Asset tag of a confidential output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidentialAsset {
    /// Absent
    Null,
    /// Explicit asset id
    Explicit(AssetId),
    /// Blinded asset generator
    Confidential([u8; 33]),
}

/// Value of a confidential output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidentialValue {
    /// Absent
    Null,
    /// Explicit amount
    Explicit(u64),
    /// Pedersen value commitment
    Confidential([u8; 33]),
}

impl ConfidentialValue {
    pub(crate) fn to_elements(self) -> Result<confidential::Value> {
        Ok(match self {
            ConfidentialValue::Null => confidential::Value::Null,
            ConfidentialValue::Explicit(v) => confidential::Value::Explicit(v),
            ConfidentialValue::Confidential(c) => confidential::Value::from_commitment(&c)?,
        })
    }
}

/// Ephemeral ECDH public key of a confidential output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidentialNonce {
    /// Absent
    Null,
    /// Compressed public key
    Confidential([u8; 33]),
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount or value commitment
    pub value: ConfidentialValue,
    /// Asset tag (null on transparent ledgers)
    pub asset: ConfidentialAsset,
    /// Blinding nonce commitment
    pub nonce: ConfidentialNonce,
    /// Locking script; empty for a fee output
    pub script_pubkey: Vec<u8>,
    /// Asset surjection proof
    pub surjection_proof: Vec<u8>,
    /// Value range proof
    pub range_proof: Vec<u8>,
}

impl TxOut {
    /// Unblinded output paying `value` of `asset` to `script_pubkey`
    pub fn explicit(ledger: Ledger, asset: AssetId, value: u64, script_pubkey: Vec<u8>) -> Self {
        let asset = match ledger {
            Ledger::Transparent => ConfidentialAsset::Null,
            Ledger::Confidential => ConfidentialAsset::Explicit(asset),
        };
        Self {
            value: ConfidentialValue::Explicit(value),
            asset,
            nonce: ConfidentialNonce::Null,
            script_pubkey,
            surjection_proof: Vec::new(),
            range_proof: Vec::new(),
        }
    }

    /// Fee outputs have no script
    pub fn is_fee(&self) -> bool {
        self.script_pubkey.is_empty()
    }

    /// The explicit amount, if not committed
    pub fn explicit_value(&self) -> Option<u64> {
        match self.value {
            ConfidentialValue::Explicit(v) => Some(v),
            _ => None,
        }
    }

    /// The explicit asset, if not committed
    pub fn explicit_asset(&self) -> Option<AssetId> {
        match self.asset {
            ConfidentialAsset::Explicit(a) => Some(a),
            _ => None,
        }
    }

    /// Replace the amount with an explicit value
    pub fn set_explicit_value(&mut self, value: u64) {
        self.value = ConfidentialValue::Explicit(value);
    }

    /// Neither asset nor value is committed
    pub fn is_explicit(&self) -> bool {
        matches!(self.value, ConfidentialValue::Explicit(_))
            && !matches!(self.asset, ConfidentialAsset::Confidential(_))
    }

    /// Both asset and value are committed
    pub fn is_blinded(&self) -> bool {
        matches!(self.value, ConfidentialValue::Confidential(_))
            && matches!(self.asset, ConfidentialAsset::Confidential(_))
    }

    fn to_bitcoin(&self) -> Result<bitcoin::TxOut> {
        let value = self.explicit_value().ok_or_else(|| {
            Error::Encoding("committed value on a transparent ledger".to_string())
        })?;
        Ok(bitcoin::TxOut {
            value: bitcoin::Amount::from_sat(value),
            script_pubkey: bitcoin::ScriptBuf::from_bytes(self.script_pubkey.clone()),
        })
    }

    fn to_elements(&self) -> Result<elements::TxOut> {
        let asset = match self.asset {
            ConfidentialAsset::Null => confidential::Asset::Null,
            ConfidentialAsset::Explicit(id) => confidential::Asset::Explicit(
                elements::AssetId::from_slice(id.as_bytes())
                    .map_err(|e| Error::Encoding(format!("asset {}: {}", id, e)))?,
            ),
            ConfidentialAsset::Confidential(g) => confidential::Asset::from_commitment(&g)?,
        };
        let nonce = match self.nonce {
            ConfidentialNonce::Null => confidential::Nonce::Null,
            ConfidentialNonce::Confidential(n) => confidential::Nonce::from_commitment(&n)?,
        };
        let surjection_proof = match self.surjection_proof.as_slice() {
            [] => None,
            proof => Some(Box::new(SurjectionProof::from_slice(proof)?)),
        };
        let rangeproof = match self.range_proof.as_slice() {
            [] => None,
            proof => Some(Box::new(RangeProof::from_slice(proof)?)),
        };
        Ok(elements::TxOut {
            asset,
            value: self.value.to_elements()?,
            nonce,
            script_pubkey: elements::Script::from(self.script_pubkey.clone()),
            witness: elements::TxOutWitness {
                surjection_proof,
                rangeproof,
            },
        })
    }

    fn from_elements(output: &elements::TxOut) -> Result<Self> {
        let asset = match output.asset {
            confidential::Asset::Null => ConfidentialAsset::Null,
            confidential::Asset::Explicit(id) => {
                ConfidentialAsset::Explicit(AssetId::from_bytes(id.into_inner().to_byte_array()))
            }
            confidential::Asset::Confidential(g) => ConfidentialAsset::Confidential(g.serialize()),
        };
        let value = match output.value {
            confidential::Value::Null => ConfidentialValue::Null,
            confidential::Value::Explicit(v) => ConfidentialValue::Explicit(v),
            confidential::Value::Confidential(c) => ConfidentialValue::Confidential(c.serialize()),
        };
        let nonce = match output.nonce {
            confidential::Nonce::Null => ConfidentialNonce::Null,
            confidential::Nonce::Confidential(pk) => {
                ConfidentialNonce::Confidential(pk.serialize())
            }
            confidential::Nonce::Explicit(_) => {
                return Err(Error::Encoding("explicit output nonces are not supported".to_string()))
            }
        };
        Ok(Self {
            value,
            asset,
            nonce,
            script_pubkey: output.script_pubkey.to_bytes(),
            surjection_proof: output
                .witness
                .surjection_proof
                .as_ref()
                .map(|p| p.serialize())
                .unwrap_or_default(),
            range_proof: output
                .witness
                .rangeproof
                .as_ref()
                .map(|p| p.serialize())
                .unwrap_or_default(),
        })
    }
}

/// A transaction under construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    /// Ledger the serialization follows
    pub ledger: Ledger,
    /// Version
    pub version: u32,
    /// Lock time
    pub lock_time: u32,
    /// Inputs
    pub inputs: Vec<TxIn>,
    /// Outputs
    pub outputs: Vec<TxOut>,
}

impl RawTransaction {
    /// Empty transaction with room for the given number of inputs and outputs
    pub fn with_capacity(
        ledger: Ledger,
        version: u32,
        lock_time: u32,
        inputs: usize,
        outputs: usize,
    ) -> Self {
        Self {
            ledger,
            version,
            lock_time,
            inputs: Vec::with_capacity(inputs),
            outputs: Vec::with_capacity(outputs),
        }
    }

    /// Append an output, returning its index
    pub fn add_output(&mut self, output: TxOut) -> usize {
        self.outputs.push(output);
        self.outputs.len() - 1
    }

    /// Position of the input spending `outpoint`
    pub fn find_input(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|i| i.previous_output == *outpoint)
    }

    /// Both inputs and outputs are present
    pub fn is_valid(&self) -> bool {
        !self.inputs.is_empty() && !self.outputs.is_empty()
    }

    /// As a transparent-ledger transaction
    pub fn to_bitcoin(&self) -> Result<bitcoin::Transaction> {
        let input = self
            .inputs
            .iter()
            .map(|i| bitcoin::TxIn {
                previous_output: bitcoin::OutPoint::new(
                    i.previous_output.txid.into(),
                    i.previous_output.vout,
                ),
                script_sig: bitcoin::ScriptBuf::from_bytes(i.script_sig.clone()),
                sequence: bitcoin::Sequence(i.sequence),
                witness: bitcoin::Witness::from_slice(&i.witness),
            })
            .collect();
        Ok(bitcoin::Transaction {
            version: bitcoin::transaction::Version(self.version as i32),
            lock_time: bitcoin::absolute::LockTime::from_consensus(self.lock_time),
            input,
            output: self.outputs.iter().map(TxOut::to_bitcoin).collect::<Result<_>>()?,
        })
    }

    /// As a confidential-ledger transaction
    pub fn to_elements(&self) -> Result<elements::Transaction> {
        let input = self
            .inputs
            .iter()
            .map(|i| elements::TxIn {
                previous_output: elements::OutPoint::new(
                    i.previous_output.txid.into(),
                    i.previous_output.vout,
                ),
                is_pegin: false,
                script_sig: elements::Script::from(i.script_sig.clone()),
                sequence: elements::Sequence(i.sequence),
                asset_issuance: Default::default(),
                witness: elements::TxInWitness {
                    script_witness: i.witness.clone(),
                    ..Default::default()
                },
            })
            .collect();
        Ok(elements::Transaction {
            version: self.version,
            lock_time: elements::LockTime::from_consensus(self.lock_time),
            input,
            output: self.outputs.iter().map(TxOut::to_elements).collect::<Result<_>>()?,
        })
    }

    /// From a transparent-ledger transaction
    pub fn from_bitcoin(tx: &bitcoin::Transaction) -> Self {
        let inputs = tx
            .input
            .iter()
            .map(|i| TxIn {
                previous_output: OutPoint {
                    txid: i.previous_output.txid.into(),
                    vout: i.previous_output.vout,
                },
                script_sig: i.script_sig.to_bytes(),
                sequence: i.sequence.0,
                witness: i.witness.to_vec(),
            })
            .collect();
        let outputs = tx
            .output
            .iter()
            .map(|o| {
                TxOut::explicit(
                    Ledger::Transparent,
                    AssetId::NATIVE,
                    o.value.to_sat(),
                    o.script_pubkey.to_bytes(),
                )
            })
            .collect();
        Self {
            ledger: Ledger::Transparent,
            version: tx.version.0 as u32,
            lock_time: tx.lock_time.to_consensus_u32(),
            inputs,
            outputs,
        }
    }

    /// From a confidential-ledger transaction without issuances or peg-ins
    pub fn from_elements(tx: &elements::Transaction) -> Result<Self> {
        let inputs = tx
            .input
            .iter()
            .map(|i| {
                if i.has_issuance() || i.is_pegin {
                    return Err(Error::Encoding(
                        "issuance and peg-in inputs are not supported".to_string(),
                    ));
                }
                Ok(TxIn {
                    previous_output: OutPoint {
                        txid: i.previous_output.txid.into(),
                        vout: i.previous_output.vout,
                    },
                    script_sig: i.script_sig.to_bytes(),
                    sequence: i.sequence.0,
                    witness: i.witness.script_witness.clone(),
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            ledger: Ledger::Confidential,
            version: tx.version,
            lock_time: tx.lock_time.to_consensus_u32(),
            inputs,
            outputs: tx.output.iter().map(TxOut::from_elements).collect::<Result<_>>()?,
        })
    }

    /// Consensus serialization
    pub fn serialize(&self) -> Result<Vec<u8>> {
        Ok(match self.ledger {
            Ledger::Transparent => bitcoin::consensus::encode::serialize(&self.to_bitcoin()?),
            Ledger::Confidential => elements::encode::serialize(&self.to_elements()?),
        })
    }

    /// Parse a consensus serialization
    pub fn deserialize(ledger: Ledger, bytes: &[u8]) -> Result<Self> {
        match ledger {
            Ledger::Transparent => {
                let tx: bitcoin::Transaction = bitcoin::consensus::encode::deserialize(bytes)?;
                Ok(Self::from_bitcoin(&tx))
            }
            Ledger::Confidential => {
                let tx: elements::Transaction = elements::encode::deserialize(bytes)?;
                Self::from_elements(&tx)
            }
        }
    }

    /// Hex of the consensus serialization
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(self.serialize()?))
    }

    /// Parse from hex
    pub fn from_hex(ledger: Ledger, s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::Encoding(format!("transaction hex: {}", e)))?;
        Self::deserialize(ledger, &bytes)
    }

    /// Transaction id
    pub fn txid(&self) -> Result<Txid> {
        Ok(match self.ledger {
            Ledger::Transparent => self.to_bitcoin()?.compute_txid().into(),
            Ledger::Confidential => self.to_elements()?.txid().into(),
        })
    }

    /// BIP141 weight
    pub fn weight(&self) -> Result<usize> {
        Ok(match self.ledger {
            Ledger::Transparent => self.to_bitcoin()?.weight().to_wu() as usize,
            Ledger::Confidential => self.to_elements()?.weight(),
        })
    }

    /// Virtual size
    pub fn vsize(&self) -> Result<usize> {
        Ok(vsize_from_weight(self.weight()?))
    }
}

/// Virtual size for a weight, rounded up
pub fn vsize_from_weight(weight: usize) -> usize {
    (weight + 3) / 4
}

/// Serialized length of a length-prefixed buffer
pub fn varbuf_len(n: usize) -> usize {
    bitcoin::consensus::encode::VarInt(n as u64).size() + n
}
