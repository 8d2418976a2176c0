//! The build record threaded through every construction stage
//!
//! A [`BuildRecord`] is created per request, filled in by the bump
//! reconstructor, the selection loop and the blinding engine, and read back
//! by the caller together with the finished [`RawTransaction`].

use crate::address::AddressType;
use crate::error::BuildError;
use crate::tx::{OutPoint, RawTransaction, Txid};
use green_params::AssetId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How inputs are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UtxoStrategy {
    /// First-fit over the candidate list, in order
    #[default]
    Default,
    /// Spend exactly the caller's `used_utxos`
    Manual,
}

/// An unspent output that may become an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    /// Funding transaction
    pub txid: Txid,
    /// Output index in the funding transaction
    pub vout: u32,
    /// Value in satoshi
    pub amount: u64,
    /// Asset (the native placeholder on transparent ledgers)
    pub asset: AssetId,
    /// Owning subaccount
    pub subaccount: u32,
    /// Address pointer within the subaccount
    pub pointer: u32,
    /// Whether the address is on the internal (change) chain
    pub is_internal: bool,
    /// Address type of the locking script
    pub address_type: AddressType,
    /// CSV block count for [`AddressType::Csv`]
    pub subtype: u32,
    /// Redeem script (multisig types); filled in lazily
    pub prevout_script: Vec<u8>,
    /// User public key (single-sig types and sweep inputs)
    pub public_key: Option<Vec<u8>>,
    /// External private key (sweep inputs)
    pub private_key: Option<[u8; 32]>,
    /// Pre-signed scriptSig of an external input
    pub script_sig: Option<Vec<u8>>,
    /// Pre-signed witness of an external input
    pub witness: Option<Vec<Vec<u8>>>,
    /// Input sequence; defaulted when the input is added
    pub sequence: Option<u32>,
    /// Signer derivation path; filled in lazily
    pub user_path: Option<Vec<u32>>,
    /// Sighash flag the user signs with
    pub user_sighash: Option<u32>,
    /// Leave the input unsigned
    pub skip_signing: bool,
    /// Asset blinding factor of the prevout (confidential ledger)
    pub asset_blinder: Option<[u8; 32]>,
    /// Value blinding factor of the prevout (confidential ledger)
    pub amount_blinder: Option<[u8; 32]>,
    /// Value commitment of the prevout (confidential ledger)
    pub commitment: Option<[u8; 33]>,
}

impl Utxo {
    /// A wallet UTXO with no optional data
    pub fn new(
        txid: Txid,
        vout: u32,
        amount: u64,
        asset: AssetId,
        address_type: AddressType,
    ) -> Self {
        Self {
            txid,
            vout,
            amount,
            asset,
            subaccount: 0,
            pointer: 0,
            is_internal: false,
            address_type,
            subtype: 0,
            prevout_script: Vec::new(),
            public_key: None,
            private_key: None,
            script_sig: None,
            witness: None,
            sequence: None,
            user_path: None,
            user_sighash: None,
            skip_signing: false,
            asset_blinder: None,
            amount_blinder: None,
            commitment: None,
        }
    }

    /// The output this UTXO refers to
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    /// Spent with a caller-supplied key rather than the wallet signer
    pub fn is_external_key(&self) -> bool {
        self.private_key.is_some()
    }

    /// Carries its own final scriptSig and witness
    pub fn is_presigned(&self) -> bool {
        self.script_sig.is_some() && self.witness.is_some()
    }

    /// Owned and signed by this wallet
    pub fn is_wallet_input(&self) -> bool {
        !self.is_external_key() && !self.is_presigned()
    }
}

/// Existing commitments of an externally blinded output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreblindedOutput {
    /// Asset blinding factor; must be non-zero
    pub asset_blinder: [u8; 32],
    /// Value blinding factor, when known
    pub amount_blinder: Option<[u8; 32]>,
    /// Value commitment, when the value blinder is not known
    pub commitment: Option<[u8; 33]>,
    /// Ephemeral public key
    pub nonce_commitment: [u8; 33],
    /// Surjection proof
    pub surjection_proof: Vec<u8>,
    /// Range proof
    pub range_proof: Vec<u8>,
    /// Blinding nonce, surfaced when nonces are requested
    pub blinding_nonce: Option<[u8; 32]>,
}

/// A requested payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressee {
    /// Destination address
    pub address: String,
    /// Amount in satoshi
    pub amount: u64,
    /// Asset; the policy asset when absent
    pub asset: Option<AssetId>,
    /// Resolved locking script
    pub script_pubkey: Vec<u8>,
    /// Resolved blinding public key (confidential ledger)
    pub blinding_key: Option<[u8; 33]>,
    /// Output position of a pre-blinded addressee
    pub index: Option<usize>,
    /// Commitments of a pre-blinded addressee
    pub preblinded: Option<PreblindedOutput>,
}

impl Addressee {
    /// Pay `amount` of the policy asset to `address`
    pub fn new(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: address.into(),
            amount,
            asset: None,
            script_pubkey: Vec::new(),
            blinding_key: None,
            index: None,
            preblinded: None,
        }
    }

    /// Pay in `asset` instead of the policy asset
    pub fn with_asset(mut self, asset: AssetId) -> Self {
        self.asset = Some(asset);
        self
    }

    /// The asset paid, defaulting to `policy_asset`
    pub fn asset_or(&self, policy_asset: AssetId) -> AssetId {
        self.asset.unwrap_or(policy_asset)
    }

    /// Whether this addressee reuses existing commitments
    pub fn is_preblinded(&self) -> bool {
        self.preblinded.is_some()
    }
}

/// A wallet-owned address, as handed out for change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddress {
    /// Address string
    pub address: String,
    /// Locking script
    pub script_pubkey: Vec<u8>,
    /// Blinding public key (confidential ledger)
    pub blinding_key: Option<[u8; 33]>,
    /// Subaccount
    pub subaccount: u32,
    /// Address pointer
    pub pointer: u32,
    /// Internal (change) chain
    pub is_internal: bool,
    /// Address type
    pub address_type: AddressType,
    /// Signer derivation path
    pub user_path: Vec<u32>,
}

/// One input or output of a prior wallet transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxEndpoint {
    /// Position within the transaction
    pub pt_idx: u32,
    /// Address (outputs only; empty for fee or unknown scripts)
    pub address: String,
    /// Value in satoshi
    pub amount: u64,
    /// Asset, when known
    pub asset: Option<AssetId>,
    /// Belongs to this wallet
    pub is_relevant: bool,
    /// On the internal chain
    pub is_internal: bool,
    /// Owning subaccount, when relevant
    pub subaccount: Option<u32>,
    /// Address pointer, when relevant
    pub pointer: u32,
    /// Address type, when relevant
    pub address_type: Option<AddressType>,
    /// CSV block count, for relevant CSV outputs
    pub subtype: u32,
}

/// A prior transaction as listed by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PreviousTransaction {
    /// Transaction id
    pub txid: Txid,
    /// Unconfirmed and signalling replaceability
    pub can_rbf: bool,
    /// Unconfirmed with a wallet output that can be spent
    pub can_cpfp: bool,
    /// Fee paid
    pub fee: u64,
    /// Fee rate paid (sat/kvB)
    pub fee_rate: u64,
    /// Inputs
    pub inputs: Vec<TxEndpoint>,
    /// Outputs
    pub outputs: Vec<TxEndpoint>,
    /// User memo
    pub memo: String,
}

/// Description of one output of the built transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    /// Value in satoshi
    pub amount: u64,
    /// Locking script; empty for the fee output
    pub script_pubkey: Vec<u8>,
    /// Asset
    pub asset: AssetId,
    /// Change output
    pub is_change: bool,
    /// Fee output
    pub is_fee: bool,
    /// Destination address
    pub address: Option<String>,
    /// Blinding public key of an output this wallet blinds
    pub blinding_key: Option<[u8; 33]>,
    /// Asset blinding factor
    pub asset_blinder: Option<[u8; 32]>,
    /// Value blinding factor
    pub amount_blinder: Option<[u8; 32]>,
    /// Ephemeral public key used when blinding
    pub eph_public_key: Option<[u8; 33]>,
    /// Blinding nonce of a pre-blinded output
    pub blinding_nonce: Option<[u8; 32]>,
    /// Output came pre-blinded
    pub is_preblinded: bool,
}

/// Size details of the built transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxSizeInfo {
    /// Weight, including estimated blinding data
    pub weight: usize,
    /// Virtual size
    pub vsize: usize,
    /// Version
    pub version: u32,
    /// Lock time
    pub lock_time: u32,
    /// Fee rate the fee amounts to (sat/kvB)
    pub calculated_fee_rate: Option<u64>,
}

/// In-flight state of one transaction build.
///
/// The record holds the request (addressees, candidates, flags) and all
/// derived results. User-correctable conditions are stored with
/// [`set_error`](Self::set_error); only the first is kept.
#[derive(Debug, Clone)]
pub struct BuildRecord {
    /// Requested payments
    pub addressees: Vec<Addressee>,
    /// Candidate UTXOs per asset, in selection order
    pub utxos: BTreeMap<AssetId, Vec<Utxo>>,
    /// UTXOs consumed, in input order
    pub used_utxos: Vec<Utxo>,
    /// Inputs carried over from the transaction being replaced
    pub old_used_utxos: Vec<Utxo>,
    /// Selection strategy
    pub strategy: UtxoStrategy,
    /// Send the whole balance to the single addressee
    pub send_all: bool,
    /// Fee rate (sat/kvB); the network default when absent
    pub fee_rate: Option<u64>,
    /// Fee of the built transaction
    pub fee: u64,
    /// Extra fee charged on behalf of a CPFP parent
    pub network_fee: u64,
    /// Fee of the transaction being bumped
    pub old_fee: Option<u64>,
    /// Fee rate of the transaction being bumped
    pub old_fee_rate: Option<u64>,
    /// Change output position per asset
    pub change_index: BTreeMap<AssetId, usize>,
    /// Change amount per asset
    pub change_amount: BTreeMap<AssetId, u64>,
    /// Change address per asset
    pub change_address: BTreeMap<AssetId, WalletAddress>,
    /// Subaccount change is sent to
    pub change_subaccount: Option<u32>,
    /// Subaccount the request spends from
    pub subaccount: Option<u32>,
    /// Incomplete transaction to be combined with others (no fee, no change)
    pub is_partial: bool,
    /// Replacing a prior transaction
    pub is_rbf: bool,
    /// Child-pays-for-parent bump
    pub is_cpfp: bool,
    /// Moving funds back into the wallet
    pub is_redeposit: bool,
    /// Sweeping an external private key
    pub is_sweep: bool,
    /// Addressees were derived and must not be edited
    pub addressees_read_only: bool,
    /// Amounts were derived and must not be edited
    pub amount_read_only: bool,
    /// Transaction to bump
    pub previous_transaction: Option<PreviousTransaction>,
    /// Key to sweep
    pub private_key: Option<String>,
    /// Shuffle newly selected inputs
    pub randomize_inputs: bool,
    /// Requested lock time
    pub locktime: Option<u32>,
    /// Requested version
    pub version: Option<u32>,
    /// Sum of candidate values for the last asset pass
    pub available_total: u64,
    /// Amount sent per asset
    pub satoshi: BTreeMap<AssetId, u64>,
    /// User memo
    pub memo: String,
    /// Scalar offsets of pre-blinded outputs, one per pre-blinded addressee
    pub scalars: Vec<[u8; 32]>,
    /// Return blinding nonces when blinding
    pub blinding_nonces_required: bool,
    /// Blinding nonces per output (none for the fee)
    pub blinding_nonces: Vec<Option<[u8; 32]>>,
    /// Commitments and proofs have been applied
    pub is_blinded: bool,
    /// The transaction being built
    pub transaction: Option<RawTransaction>,
    /// Per-output description of `transaction`
    pub transaction_outputs: Vec<OutputInfo>,
    /// Size details of `transaction`
    pub size: TxSizeInfo,
    error: Option<BuildError>,
}

impl Default for BuildRecord {
    fn default() -> Self {
        Self {
            addressees: Vec::new(),
            utxos: BTreeMap::new(),
            used_utxos: Vec::new(),
            old_used_utxos: Vec::new(),
            strategy: UtxoStrategy::Default,
            send_all: false,
            fee_rate: None,
            fee: 0,
            network_fee: 0,
            old_fee: None,
            old_fee_rate: None,
            change_index: BTreeMap::new(),
            change_amount: BTreeMap::new(),
            change_address: BTreeMap::new(),
            change_subaccount: None,
            subaccount: None,
            is_partial: false,
            is_rbf: false,
            is_cpfp: false,
            is_redeposit: false,
            is_sweep: false,
            addressees_read_only: false,
            amount_read_only: false,
            previous_transaction: None,
            private_key: None,
            randomize_inputs: true,
            locktime: None,
            version: None,
            available_total: 0,
            satoshi: BTreeMap::new(),
            memo: String::new(),
            scalars: Vec::new(),
            blinding_nonces_required: false,
            blinding_nonces: Vec::new(),
            is_blinded: false,
            transaction: None,
            transaction_outputs: Vec::new(),
            size: TxSizeInfo::default(),
            error: None,
        }
    }
}

impl BuildRecord {
    /// Request paying `addressees` from `utxos`
    pub fn new(addressees: Vec<Addressee>, utxos: BTreeMap<AssetId, Vec<Utxo>>) -> Self {
        Self {
            addressees,
            utxos,
            ..Self::default()
        }
    }

    /// Record a user-correctable condition, unless one is already recorded
    pub fn set_error(&mut self, error: BuildError) {
        if self.error.is_none() {
            tracing::debug!("build error: {}", error);
            self.error = Some(error);
        }
    }

    /// The first recorded condition
    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    /// Whether a condition is recorded
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Change output position for `asset`
    pub fn change_index_for(&self, asset: &AssetId) -> Option<usize> {
        self.change_index.get(asset).copied()
    }

    /// Subaccounts the request touches: wallet candidates and used
    /// UTXOs plus the explicit subaccount fields
    pub fn tx_subaccounts(&self) -> BTreeSet<u32> {
        let mut out: BTreeSet<u32> = self
            .used_utxos
            .iter()
            .chain(self.utxos.values().flatten())
            .filter(|u| u.is_wallet_input())
            .map(|u| u.subaccount)
            .collect();
        out.extend(self.subaccount);
        out.extend(self.change_subaccount);
        out
    }

    /// The only subaccount the request touches
    pub fn single_subaccount(&self) -> Result<u32, BuildError> {
        let subaccounts = self.tx_subaccounts();
        match subaccounts.len() {
            1 => subaccounts
                .into_iter()
                .next()
                .ok_or(BuildError::CannotDetermineSubaccount),
            _ => Err(BuildError::CannotDetermineSubaccount),
        }
    }
}
