//! Green wallet transaction construction
//!
//! This crate builds, fee-bumps, blinds and signs transactions for a
//! 2of2 multisig (or single-sig) wallet on a transparent UTXO ledger and on
//! a confidential ledger with blinded amounts and assets.
//!
//! A build is driven by a [`BuildRecord`]: the caller fills in addressees,
//! UTXOs and options, [`create_transaction`] selects coins and converges on
//! a fee, [`blind_transaction`] blinds the outputs on the confidential
//! ledger and [`sign_transaction`] signs the inputs. Wallet state and keys
//! are reached through the [`Signer`] and [`WalletResolver`] traits.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod amount;
pub mod blinding;
pub mod bump;
pub mod confidential;
pub mod create;
pub mod crypto;
pub mod error;
pub mod fees;
pub mod record;
pub mod script;
mod selection;
pub mod session;
pub mod sighash;
pub mod sign;
pub mod signatures;
pub mod spend;
pub mod tx;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use address::AddressType;
pub use amount::Amount;
pub use blinding::{
    blind_transaction, get_blinding_factors, hash_prevouts, unblind_output, BlindingFactors,
    UnblindedOutput,
};
pub use bump::{check_bump_tx, BumpMode};
pub use confidential::{ConfidentialPrimitives, RangeproofRequest, Secp256k1Confidential, Unblinded};
pub use create::{create_transaction, update_tx_info, update_tx_size_info, validate_addressee};
pub use error::{BuildError, Error, ErrorCategory, Result};
pub use record::{
    Addressee, BuildRecord, OutputInfo, PreblindedOutput, PreviousTransaction, TxEndpoint,
    TxSizeInfo, Utxo, UtxoStrategy, WalletAddress,
};
pub use session::{BuildContext, KeyLocator, ResolvedAddress, Signer, WalletResolver};
pub use sign::{get_signing_inputs, sign_transaction};
pub use signatures::{get_signatures_from_input, verify_input_signatures};
pub use spend::SpendTemplate;
pub use tx::{OutPoint, RawTransaction, TxIn, TxOut, Txid};
