//! Collaborators the construction core calls out to
//!
//! The core never derives keys, encodes addresses or talks to the network
//! itself. A [`Signer`] produces signatures and blinding keys, a
//! [`WalletResolver`] knows the wallet's scripts, addresses and history, and
//! a [`ConfidentialPrimitives`] implementation supplies commitments and
//! proofs. [`BuildContext`] bundles them with the network parameters.

use crate::address::AddressType;
use crate::confidential::{ConfidentialPrimitives, Secp256k1Confidential};
use crate::record::{Utxo, WalletAddress};
use crate::tx::{RawTransaction, Txid};
use crate::Result;
use green_params::{FeePolicy, Network};
use secp256k1::ecdsa::Signature;
use secp256k1::{PublicKey, SecretKey};

static DEFAULT_PRIMITIVES: Secp256k1Confidential = Secp256k1Confidential;

/// Signing device or software signer
pub trait Signer {
    /// Sign a 32-byte hash with the key at `path`
    fn sign_hash(&self, path: &[u32], hash: &[u8; 32]) -> Result<Signature>;

    /// Whether signatures are ground to a low R value
    fn supports_low_r(&self) -> bool;

    /// Whether outputs blinded by another party can be signed for
    fn supports_external_blinding(&self) -> bool {
        false
    }

    /// Private blinding key for a wallet script (confidential ledger)
    fn blinding_key_from_script(&self, script_pubkey: &[u8]) -> Result<SecretKey>;
}

/// Where a wallet key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLocator {
    /// Subaccount
    pub subaccount: u32,
    /// Address pointer
    pub pointer: u32,
    /// Internal (change) chain
    pub is_internal: bool,
    /// Address type
    pub address_type: AddressType,
    /// CSV block count for CSV addresses
    pub subtype: u32,
}

impl From<&Utxo> for KeyLocator {
    fn from(utxo: &Utxo) -> Self {
        Self {
            subaccount: utxo.subaccount,
            pointer: utxo.pointer,
            is_internal: utxo.is_internal,
            address_type: utxo.address_type,
            subtype: utxo.subtype,
        }
    }
}

/// Result of resolving an address string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// Locking script
    pub script_pubkey: Vec<u8>,
    /// Blinding public key; absent for non-confidential addresses
    pub blinding_key: Option<[u8; 33]>,
}

/// Wallet key, address and history lookups
pub trait WalletResolver {
    /// Whether the wallet holds single-sig keys only (no service co-signer)
    fn is_single_sig(&self) -> bool;

    /// Redeem script for a multisig address
    fn signing_script(&self, locator: &KeyLocator) -> Result<Vec<u8>>;

    /// Public keys for an address: `[service, user]` for multisig types,
    /// `[user]` for single-sig types
    fn public_keys(&self, locator: &KeyLocator) -> Result<Vec<PublicKey>>;

    /// Full signer derivation path for the user key
    fn user_path(&self, locator: &KeyLocator) -> Result<Vec<u32>>;

    /// A fresh address in `subaccount`
    fn receive_address(&self, subaccount: u32, is_internal: bool) -> Result<WalletAddress>;

    /// Locking script and blinding key for an address string.
    ///
    /// Unparseable addresses fail with `BuildError::InvalidAddress`.
    fn resolve_address(&self, address: &str) -> Result<ResolvedAddress>;

    /// A transaction from the wallet's history
    fn raw_transaction(&self, txid: &Txid) -> Result<RawTransaction>;

    /// Current chain tip height
    fn block_height(&self) -> Result<u32>;

    /// Outputs spendable by an external private key.
    ///
    /// An unparseable key fails with `Error::InvalidKey`.
    fn unspent_outputs_for_private_key(&self, private_key: &str) -> Result<Vec<Utxo>>;
}

/// Everything a construction stage may call out to
#[derive(Clone, Copy)]
pub struct BuildContext<'a> {
    /// Network parameters
    pub network: &'a Network,
    /// Signer
    pub signer: &'a dyn Signer,
    /// Wallet lookups
    pub wallet: &'a dyn WalletResolver,
    /// Commitment and proof primitives
    pub primitives: &'a dyn ConfidentialPrimitives,
}

impl<'a> BuildContext<'a> {
    /// Context using the built-in secp256k1 primitives
    pub fn new(
        network: &'a Network,
        signer: &'a dyn Signer,
        wallet: &'a dyn WalletResolver,
    ) -> Self {
        Self {
            network,
            signer,
            wallet,
            primitives: &DEFAULT_PRIMITIVES,
        }
    }

    /// Replace the commitment and proof primitives
    pub fn with_primitives(mut self, primitives: &'a dyn ConfidentialPrimitives) -> Self {
        self.primitives = primitives;
        self
    }

    /// Fee floor and dust rules
    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy::for_network(self.network)
    }
}
