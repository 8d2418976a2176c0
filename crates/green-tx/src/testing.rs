//! In-memory wallet collaborators for tests
//!
//! [`MockWallet`] is both the [`Signer`] and the [`WalletResolver`] of a
//! deterministic wallet: every key is a hash of a fixed seed and the key's
//! location, addresses are plain hex encodings of their scripts, and prior
//! transactions live in memory.
//!
//! Address strings are `addr:<script hex>` on the transparent ledger and
//! `ct:<blinding key hex>:<script hex>` on the confidential ledger.

use crate::address::AddressType;
use crate::confidential::{ConfidentialPrimitives, Secp256k1Confidential};
use crate::crypto::{der_with_sighash, sha256, sign_hash, SECP, SIGHASH_ALL};
use crate::error::BuildError;
use crate::record::{BuildRecord, PreviousTransaction, TxEndpoint, Utxo, WalletAddress};
use crate::script::{csv_2of2, multisig_2of2, p2wpkh};
use crate::session::{BuildContext, KeyLocator, ResolvedAddress, Signer, WalletResolver};
use crate::sighash::signature_hash;
use crate::sign::get_signing_inputs;
use crate::spend::SpendTemplate;
use crate::tx::{RawTransaction, Txid};
use crate::{Error, Result};
use green_params::{AssetId, Network};
use parking_lot::Mutex;
use secp256k1::ecdsa::Signature;
use secp256k1::{PublicKey, SecretKey};
use std::collections::BTreeMap;

const DEFAULT_BLOCK_HEIGHT: u32 = 800_000;

#[derive(Default)]
struct MockState {
    next_pointer: BTreeMap<(u32, bool), u32>,
    next_txid: u32,
    addresses: BTreeMap<Vec<u8>, WalletAddress>,
    transactions: BTreeMap<Txid, RawTransaction>,
    sweep_funds: BTreeMap<String, Vec<u64>>,
}

/// Deterministic software wallet for tests
pub struct MockWallet {
    network: Network,
    single_sig: bool,
    address_type: AddressType,
    seed: [u8; 32],
    block_height: u32,
    external_blinding: bool,
    csv_blocks: Mutex<Option<u32>>,
    state: Mutex<MockState>,
}

fn derive_secret(parts: &[&[u8]]) -> SecretKey {
    let mut data = parts.concat();
    loop {
        let hash = sha256(&data);
        if let Ok(key) = SecretKey::from_slice(&hash) {
            return key;
        }
        data = hash.to_vec();
    }
}

fn public(key: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&SECP, key)
}

impl MockWallet {
    fn new(network: &Network, single_sig: bool, address_type: AddressType) -> Self {
        Self {
            network: network.clone(),
            single_sig,
            address_type,
            seed: sha256(network.name.as_bytes()),
            block_height: DEFAULT_BLOCK_HEIGHT,
            external_blinding: true,
            csv_blocks: Mutex::new(None),
            state: Mutex::new(MockState::default()),
        }
    }

    /// A 2of2 multisig wallet using P2SH-P2WSH addresses
    pub fn multisig(network: &Network) -> Self {
        Self::new(network, false, AddressType::P2wsh)
    }

    /// A single-sig wallet using native segwit addresses
    pub fn single_sig(network: &Network) -> Self {
        Self::new(network, true, AddressType::P2wpkh)
    }

    /// Use `address_type` for new addresses and UTXOs
    pub fn with_address_type(mut self, address_type: AddressType) -> Self {
        self.address_type = address_type;
        self
    }

    /// Whether the signer accepts externally blinded outputs
    pub fn with_external_blinding(mut self, supported: bool) -> Self {
        self.external_blinding = supported;
        self
    }

    /// Change the CSV timelock new addresses are created with; the
    /// network's first bucket until set
    pub fn set_csv_blocks(&self, blocks: u32) {
        *self.csv_blocks.lock() = Some(blocks);
    }

    /// Build context over this wallet
    pub fn context(&self) -> BuildContext<'_> {
        BuildContext::new(&self.network, self, self)
    }

    /// Network the wallet was created for
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// The chain tip reported to the builder
    pub fn block_height_value(&self) -> u32 {
        self.block_height
    }

    /// Master key blinding factors are derived from
    pub fn master_blinding_key(&self) -> [u8; 32] {
        sha256(&[&self.seed[..], b"master-blinding"].concat())
    }

    fn path(locator: &KeyLocator) -> Vec<u32> {
        vec![locator.subaccount, u32::from(locator.is_internal), locator.pointer]
    }

    fn user_secret(&self, path: &[u32]) -> SecretKey {
        let path: Vec<u8> = path.iter().flat_map(|p| p.to_le_bytes()).collect();
        derive_secret(&[&self.seed, b"user", &path])
    }

    fn service_secret(&self, locator: &KeyLocator) -> SecretKey {
        let path: Vec<u8> = Self::path(locator).iter().flat_map(|p| p.to_le_bytes()).collect();
        derive_secret(&[&self.seed, b"service", &path])
    }

    fn blinding_secret(&self, script_pubkey: &[u8]) -> SecretKey {
        derive_secret(&[&self.seed, b"blinding", script_pubkey])
    }

    fn redeem_script(&self, locator: &KeyLocator) -> Result<Vec<u8>> {
        let service = public(&self.service_secret(locator)).serialize();
        let user = public(&self.user_secret(&Self::path(locator))).serialize();
        match locator.address_type {
            AddressType::Csv => csv_2of2(&service, &user, locator.subtype, true),
            _ => multisig_2of2(&service, &user),
        }
    }

    fn locator_script_pubkey(&self, locator: &KeyLocator) -> Result<Vec<u8>> {
        if locator.address_type.is_multisig() {
            Ok(locator.address_type.script_pubkey(&self.redeem_script(locator)?))
        } else {
            let user = public(&self.user_secret(&Self::path(locator))).serialize();
            Ok(locator.address_type.script_pubkey(&user))
        }
    }

    fn encode_address(&self, script_pubkey: &[u8], blinding_key: Option<[u8; 33]>) -> String {
        match blinding_key {
            Some(key) => format!("ct:{}:{}", hex::encode(key), hex::encode(script_pubkey)),
            None => format!("addr:{}", hex::encode(script_pubkey)),
        }
    }

    fn csv_subtype(&self, address_type: AddressType) -> u32 {
        match address_type {
            AddressType::Csv => {
                let configured = *self.csv_blocks.lock();
                configured
                    .or_else(|| self.network.csv_buckets.first().copied())
                    .unwrap_or_default()
            }
            _ => 0,
        }
    }

    fn new_address(&self, subaccount: u32, is_internal: bool) -> Result<WalletAddress> {
        let mut state = self.state.lock();
        let pointer = state.next_pointer.entry((subaccount, is_internal)).or_insert(0);
        *pointer += 1;
        let locator = KeyLocator {
            subaccount,
            pointer: *pointer,
            is_internal,
            address_type: self.address_type,
            subtype: self.csv_subtype(self.address_type),
        };
        let script_pubkey = self.locator_script_pubkey(&locator)?;
        let blinding_key = self
            .network
            .is_confidential()
            .then(|| public(&self.blinding_secret(&script_pubkey)).serialize());
        let address = WalletAddress {
            address: self.encode_address(&script_pubkey, blinding_key),
            script_pubkey: script_pubkey.clone(),
            blinding_key,
            subaccount,
            pointer: locator.pointer,
            is_internal,
            address_type: self.address_type,
            user_path: Self::path(&locator),
        };
        state.addresses.insert(script_pubkey, address.clone());
        Ok(address)
    }

    fn next_txid(&self) -> Txid {
        let mut state = self.state.lock();
        state.next_txid += 1;
        let count = state.next_txid.to_le_bytes();
        Txid::from_bytes(sha256(&[&self.seed[..], b"txid", &count].concat()))
    }

    /// A fresh UTXO of the policy asset in `subaccount`
    pub fn utxo(&self, subaccount: u32, amount: u64) -> Result<Utxo> {
        self.utxo_with_asset(subaccount, amount, self.network.policy_asset)
    }

    /// A fresh UTXO of `asset` in `subaccount`; blinded on the
    /// confidential ledger
    pub fn utxo_with_asset(&self, subaccount: u32, amount: u64, asset: AssetId) -> Result<Utxo> {
        let address = self.new_address(subaccount, false)?;
        let txid = self.next_txid();
        let mut utxo = Utxo::new(txid, 0, amount, asset, self.address_type);
        utxo.subaccount = subaccount;
        utxo.pointer = address.pointer;
        utxo.subtype = self.csv_subtype(self.address_type);
        if self.network.is_confidential() {
            let abf = derive_secret(&[txid.as_bytes(), b"abf"]).secret_bytes();
            let vbf = derive_secret(&[txid.as_bytes(), b"vbf"]).secret_bytes();
            let primitives = Secp256k1Confidential;
            let generator = primitives.asset_generator(&asset, &abf)?;
            let commitment = primitives.value_commitment(amount, &vbf, &generator)?;
            utxo.asset_blinder = Some(abf);
            utxo.amount_blinder = Some(vbf);
            utxo.commitment = Some(commitment);
        }
        Ok(utxo)
    }

    /// An address outside the wallet, distinct per `n`
    pub fn external_address(&self, n: u32) -> String {
        let key = derive_secret(&[b"external", &n.to_le_bytes()]);
        let script_pubkey = p2wpkh(&public(&key).serialize());
        let blinding_key = self.network.is_confidential().then(|| {
            public(&derive_secret(&[b"external-blinding", &n.to_le_bytes()])).serialize()
        });
        self.encode_address(&script_pubkey, blinding_key)
    }

    /// An external address with its blinding key dropped
    pub fn unconfidential_address(&self, n: u32) -> String {
        let key = derive_secret(&[b"external", &n.to_le_bytes()]);
        self.encode_address(&p2wpkh(&public(&key).serialize()), None)
    }

    /// Hex private key `n` for sweeping
    pub fn sweep_key(&self, n: u32) -> String {
        hex::encode(derive_secret(&[b"sweep", &n.to_le_bytes()]).secret_bytes())
    }

    /// Make `amounts` spendable by `private_key`
    pub fn fund_sweep_key(&self, private_key: &str, amounts: &[u64]) {
        self.state
            .lock()
            .sweep_funds
            .insert(private_key.to_string(), amounts.to_vec());
    }

    /// Make `tx` available as wallet history
    pub fn add_transaction(&self, tx: RawTransaction) -> Result<()> {
        let txid = tx.txid()?;
        self.state.lock().transactions.insert(txid, tx);
        Ok(())
    }

    /// The built transaction of `record` with both user and service
    /// signatures on every wallet input
    pub fn fully_sign(&self, record: &BuildRecord) -> Result<RawTransaction> {
        let inputs = get_signing_inputs(record)?;
        let mut tx = record
            .transaction
            .clone()
            .ok_or_else(|| Error::InvalidState("nothing to sign".to_string()))?;
        for (index, utxo) in inputs.iter().enumerate() {
            if !utxo.is_wallet_input() {
                continue;
            }
            let template = SpendTemplate::for_utxo(utxo)?;
            let sighash = utxo.user_sighash.unwrap_or(SIGHASH_ALL);
            let hash = signature_hash(&tx, index, &template.script_code(), utxo, sighash)?;
            let locator = KeyLocator::from(utxo);
            let user_key = self.user_secret(&Self::path(&locator));
            let user = der_with_sighash(&sign_hash(&user_key, &hash, true)?, sighash)?;
            let (script_sig, witness) = if template.is_multisig() {
                let service_key = self.service_secret(&locator);
                let service = der_with_sighash(&sign_hash(&service_key, &hash, true)?, sighash)?;
                template.fully_signed(&service, &user)?
            } else {
                template.user_signed(&user)?
            };
            tx.inputs[index].script_sig = script_sig;
            tx.inputs[index].witness = witness;
        }
        Ok(tx)
    }

    /// Describe a broadcast `tx` built from `record` the way wallet history
    /// lists it, as replaceable
    pub fn previous_transaction(
        &self,
        record: &BuildRecord,
        tx: &RawTransaction,
    ) -> Result<PreviousTransaction> {
        let inputs = get_signing_inputs(record)?
            .iter()
            .enumerate()
            .map(|(i, utxo)| TxEndpoint {
                pt_idx: i as u32,
                address: String::new(),
                amount: utxo.amount,
                asset: Some(utxo.asset),
                is_relevant: true,
                is_internal: utxo.is_internal,
                subaccount: Some(utxo.subaccount),
                pointer: utxo.pointer,
                address_type: Some(utxo.address_type),
                subtype: utxo.subtype,
            })
            .collect();

        let state = self.state.lock();
        let outputs = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                let info = record.transaction_outputs.get(i);
                let amount = info.map(|o| o.amount).unwrap_or_default();
                let asset = info.map(|o| o.asset);
                match state.addresses.get(&output.script_pubkey) {
                    Some(owned) => TxEndpoint {
                        pt_idx: i as u32,
                        address: owned.address.clone(),
                        amount,
                        asset,
                        is_relevant: true,
                        is_internal: owned.is_internal,
                        subaccount: Some(owned.subaccount),
                        pointer: owned.pointer,
                        address_type: Some(owned.address_type),
                        subtype: self.csv_subtype(owned.address_type),
                    },
                    None => TxEndpoint {
                        pt_idx: i as u32,
                        address: info.and_then(|o| o.address.clone()).unwrap_or_default(),
                        amount,
                        asset,
                        ..Default::default()
                    },
                }
            })
            .collect();

        Ok(PreviousTransaction {
            txid: tx.txid()?,
            can_rbf: true,
            can_cpfp: false,
            fee: record.fee,
            fee_rate: record.size.calculated_fee_rate.unwrap_or_default(),
            inputs,
            outputs,
            memo: record.memo.clone(),
        })
    }
}

impl Signer for MockWallet {
    fn sign_hash(&self, path: &[u32], hash: &[u8; 32]) -> Result<Signature> {
        sign_hash(&self.user_secret(path), hash, true)
    }

    fn supports_low_r(&self) -> bool {
        true
    }

    fn supports_external_blinding(&self) -> bool {
        self.external_blinding
    }

    fn blinding_key_from_script(&self, script_pubkey: &[u8]) -> Result<SecretKey> {
        Ok(self.blinding_secret(script_pubkey))
    }
}

impl WalletResolver for MockWallet {
    fn is_single_sig(&self) -> bool {
        self.single_sig
    }

    fn signing_script(&self, locator: &KeyLocator) -> Result<Vec<u8>> {
        if !locator.address_type.is_multisig() {
            return Err(Error::Resolver(format!("{} has no redeem script", locator.address_type)));
        }
        self.redeem_script(locator)
    }

    fn public_keys(&self, locator: &KeyLocator) -> Result<Vec<PublicKey>> {
        let user = public(&self.user_secret(&Self::path(locator)));
        if locator.address_type.is_multisig() {
            Ok(vec![public(&self.service_secret(locator)), user])
        } else {
            Ok(vec![user])
        }
    }

    fn user_path(&self, locator: &KeyLocator) -> Result<Vec<u32>> {
        Ok(Self::path(locator))
    }

    fn receive_address(&self, subaccount: u32, is_internal: bool) -> Result<WalletAddress> {
        self.new_address(subaccount, is_internal)
    }

    fn resolve_address(&self, address: &str) -> Result<ResolvedAddress> {
        let parts: Vec<&str> = address.split(':').collect();
        let decode = |s: &str| hex::decode(s).map_err(|_| Error::Build(BuildError::InvalidAddress));
        match parts.as_slice() {
            ["addr", script] => Ok(ResolvedAddress {
                script_pubkey: decode(script)?,
                blinding_key: None,
            }),
            ["ct", key, script] => {
                let key = <[u8; 33]>::try_from(decode(key)?.as_slice())
                    .map_err(|_| Error::Build(BuildError::InvalidAddress))?;
                Ok(ResolvedAddress {
                    script_pubkey: decode(script)?,
                    blinding_key: Some(key),
                })
            }
            _ => Err(BuildError::InvalidAddress.into()),
        }
    }

    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction> {
        self.state
            .lock()
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::Resolver(format!("unknown transaction {}", txid)))
    }

    fn block_height(&self) -> Result<u32> {
        Ok(self.block_height)
    }

    fn unspent_outputs_for_private_key(&self, private_key: &str) -> Result<Vec<Utxo>> {
        let bytes = hex::decode(private_key).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let key = SecretKey::from_slice(&bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let amounts = self
            .state
            .lock()
            .sweep_funds
            .get(private_key)
            .cloned()
            .unwrap_or_default();
        let txid = Txid::from_bytes(sha256(&[&bytes[..], b"sweep"].concat()));
        Ok(amounts
            .iter()
            .enumerate()
            .map(|(vout, amount)| {
                let asset = self.network.policy_asset;
                let mut utxo = Utxo::new(txid, vout as u32, *amount, asset, AddressType::P2pkh);
                utxo.private_key = Some(key.secret_bytes());
                utxo.public_key = Some(public(&key).serialize().to_vec());
                utxo
            })
            .collect())
    }
}
