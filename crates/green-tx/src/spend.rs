//! Input scripts and witnesses per address type
//!
//! [`SpendTemplate`] captures what is needed to unlock one kind of output.
//! Every template produces three forms of the same input:
//!
//! - a placeholder with dummy signatures, sized like the final form so fees
//!   estimated from it are never short
//! - the user-signed form handed to the service for co-signing
//! - the fully signed form
//!
//! [`add_utxo`] appends an input with its placeholder; [`add_input_signature`]
//! replaces the placeholder once the user has signed.

use crate::address::AddressType;
use crate::crypto::{public_key, SECP};
use crate::record::Utxo;
use crate::script::{
    self, dummy_signature, is_optimized_csv, multisig_script_sig, multisig_user_script_sig,
    p2pkh_script_sig, p2sh_p2wpkh_script_sig, p2sh_p2wsh_script_sig,
};
use crate::session::{BuildContext, KeyLocator};
use crate::tx::{RawTransaction, TxIn};
use crate::{Error, Result};
use secp256k1::{PublicKey, SecretKey};

/// How an input is unlocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendTemplate {
    /// Single key supplied by the caller (sweep); pay-to-pubkey-hash
    External {
        /// Public key of the external private key
        public_key: Vec<u8>,
    },
    /// Wallet single-sig pay-to-pubkey-hash
    SingleSigLegacy {
        /// User public key
        public_key: Vec<u8>,
    },
    /// Wallet single-sig segwit in P2SH
    SingleSigSegwitWrapped {
        /// User public key
        public_key: Vec<u8>,
    },
    /// Wallet single-sig native segwit
    SingleSigSegwitNative {
        /// User public key
        public_key: Vec<u8>,
    },
    /// 2of2 multisig in P2SH
    MultisigLegacy {
        /// `OP_2 <service> <user> OP_2 OP_CHECKMULTISIG`
        redeem_script: Vec<u8>,
    },
    /// 2of2 multisig in P2SH-wrapped P2WSH
    MultisigSegwit {
        /// `OP_2 <service> <user> OP_2 OP_CHECKMULTISIG`
        redeem_script: Vec<u8>,
    },
    /// 2of2 CSV recovery script in P2SH-wrapped P2WSH
    MultisigCsv {
        /// CSV redeem script
        redeem_script: Vec<u8>,
        /// Legacy layout: the user signature sits deeper in the witness
        user_first: bool,
    },
}

/// scriptSig and witness stack for one input
pub type InputScripts = (Vec<u8>, Vec<Vec<u8>>);

impl SpendTemplate {
    /// Template for spending `utxo`.
    ///
    /// Needs `public_key` for single-sig and external inputs and
    /// `prevout_script` for multisig inputs.
    pub fn for_utxo(utxo: &Utxo) -> Result<Self> {
        let public_key = || {
            utxo.public_key.clone().ok_or_else(|| {
                Error::InvalidState(format!("no public key for {:?}", utxo.outpoint()))
            })
        };
        let redeem_script = || {
            if utxo.prevout_script.is_empty() {
                Err(Error::InvalidState(format!("no redeem script for {:?}", utxo.outpoint())))
            } else {
                Ok(utxo.prevout_script.clone())
            }
        };

        if utxo.is_external_key() {
            return Ok(SpendTemplate::External {
                public_key: public_key()?,
            });
        }
        Ok(match utxo.address_type {
            AddressType::P2pkh => SpendTemplate::SingleSigLegacy {
                public_key: public_key()?,
            },
            AddressType::P2shP2wpkh => SpendTemplate::SingleSigSegwitWrapped {
                public_key: public_key()?,
            },
            AddressType::P2wpkh => SpendTemplate::SingleSigSegwitNative {
                public_key: public_key()?,
            },
            AddressType::P2sh => SpendTemplate::MultisigLegacy {
                redeem_script: redeem_script()?,
            },
            AddressType::P2wsh => SpendTemplate::MultisigSegwit {
                redeem_script: redeem_script()?,
            },
            AddressType::Csv => {
                let redeem_script = redeem_script()?;
                SpendTemplate::MultisigCsv {
                    user_first: !is_optimized_csv(&redeem_script),
                    redeem_script,
                }
            }
        })
    }

    /// Whether the input carries its signatures in the witness
    pub fn is_segwit(&self) -> bool {
        !matches!(
            self,
            SpendTemplate::External { .. }
                | SpendTemplate::SingleSigLegacy { .. }
                | SpendTemplate::MultisigLegacy { .. }
        )
    }

    /// Whether a service co-signature is required
    pub fn is_multisig(&self) -> bool {
        matches!(
            self,
            SpendTemplate::MultisigLegacy { .. }
                | SpendTemplate::MultisigSegwit { .. }
                | SpendTemplate::MultisigCsv { .. }
        )
    }

    /// The script signatures commit to
    pub fn script_code(&self) -> Vec<u8> {
        match self {
            SpendTemplate::External { public_key }
            | SpendTemplate::SingleSigLegacy { public_key }
            | SpendTemplate::SingleSigSegwitWrapped { public_key }
            | SpendTemplate::SingleSigSegwitNative { public_key } => script::p2pkh(public_key),
            SpendTemplate::MultisigLegacy { redeem_script }
            | SpendTemplate::MultisigSegwit { redeem_script }
            | SpendTemplate::MultisigCsv { redeem_script, .. } => redeem_script.clone(),
        }
    }

    /// Same-size stand-in for the fully signed input
    pub fn placeholder(&self, low_r: bool) -> Result<InputScripts> {
        let dummy = dummy_signature(low_r);
        self.fully_signed(&dummy, &dummy)
    }

    /// The input carrying only the user's signature.
    ///
    /// Multisig inputs leave the service slot for the co-signer: legacy
    /// inputs carry `OP_0 OP_1 OP_0 <sig> <redeem>`, segwit inputs a
    /// one-item witness.
    pub fn user_signed(&self, user_der: &[u8]) -> Result<InputScripts> {
        match self {
            SpendTemplate::External { .. } => Err(Error::InvalidState(
                "external inputs are signed with their own key".to_string(),
            )),
            SpendTemplate::SingleSigLegacy { .. }
            | SpendTemplate::SingleSigSegwitWrapped { .. }
            | SpendTemplate::SingleSigSegwitNative { .. } => self.fully_signed(&[], user_der),
            SpendTemplate::MultisigLegacy { redeem_script } => {
                Ok((multisig_user_script_sig(user_der, redeem_script)?, Vec::new()))
            }
            SpendTemplate::MultisigSegwit { redeem_script }
            | SpendTemplate::MultisigCsv { redeem_script, .. } => {
                Ok((p2sh_p2wsh_script_sig(redeem_script)?, vec![user_der.to_vec()]))
            }
        }
    }

    /// The input carrying every signature it needs.
    ///
    /// `service_der` is ignored by single-signature templates.
    pub fn fully_signed(&self, service_der: &[u8], user_der: &[u8]) -> Result<InputScripts> {
        Ok(match self {
            SpendTemplate::External { public_key }
            | SpendTemplate::SingleSigLegacy { public_key } => {
                (p2pkh_script_sig(user_der, public_key)?, Vec::new())
            }
            SpendTemplate::SingleSigSegwitWrapped { public_key } => (
                p2sh_p2wpkh_script_sig(public_key)?,
                vec![user_der.to_vec(), public_key.clone()],
            ),
            SpendTemplate::SingleSigSegwitNative { public_key } => {
                (Vec::new(), vec![user_der.to_vec(), public_key.clone()])
            }
            SpendTemplate::MultisigLegacy { redeem_script } => {
                (multisig_script_sig(service_der, user_der, redeem_script)?, Vec::new())
            }
            SpendTemplate::MultisigSegwit { redeem_script } => (
                p2sh_p2wsh_script_sig(redeem_script)?,
                vec![Vec::new(), service_der.to_vec(), user_der.to_vec(), redeem_script.clone()],
            ),
            SpendTemplate::MultisigCsv {
                redeem_script,
                user_first,
            } => {
                // Three items, not the `[NULL, sig, sig, script]` of plain
                // 2of2: the CSV script checks each key with CHECKSIG(VERIFY)
                // and consumes no dummy element. Its serialized size is that
                // of the witness the service completes.
                let witness = if *user_first {
                    vec![user_der.to_vec(), service_der.to_vec(), redeem_script.clone()]
                } else {
                    vec![service_der.to_vec(), user_der.to_vec(), redeem_script.clone()]
                };
                (p2sh_p2wsh_script_sig(redeem_script)?, witness)
            }
        })
    }
}

/// Fill in the signer derivation path of a wallet UTXO when missing
pub fn utxo_add_paths(ctx: &BuildContext<'_>, utxo: &mut Utxo) -> Result<()> {
    if utxo.is_wallet_input() && utxo.user_path.is_none() {
        utxo.user_path = Some(ctx.wallet.user_path(&KeyLocator::from(&*utxo))?);
    }
    Ok(())
}

/// Fill in the script or key a wallet UTXO is spent with
pub fn populate_spend_data(ctx: &BuildContext<'_>, utxo: &mut Utxo) -> Result<()> {
    if utxo.is_external_key() {
        if utxo.public_key.is_none() {
            if let Some(secret) = utxo.private_key {
                let key = SecretKey::from_slice(&secret)
                    .map_err(|e| Error::InvalidKey(format!("sweep key: {}", e)))?;
                let public_key = PublicKey::from_secret_key(&SECP, &key);
                utxo.public_key = Some(public_key.serialize().to_vec());
            }
        }
        return Ok(());
    }

    let locator = KeyLocator::from(&*utxo);
    if utxo.address_type.is_multisig() {
        if utxo.prevout_script.is_empty() {
            utxo.prevout_script = ctx.wallet.signing_script(&locator)?;
        }
    } else if utxo.public_key.is_none() {
        let keys = ctx.wallet.public_keys(&locator)?;
        let key = keys
            .first()
            .ok_or_else(|| Error::Resolver(format!("no public key for {:?}", utxo.outpoint())))?;
        utxo.public_key = Some(key.serialize().to_vec());
    }
    utxo_add_paths(ctx, utxo)
}

/// Append `utxo` as an input with placeholder signatures.
///
/// Returns false without changes when the output is already spent by `tx`.
/// Pre-signed inputs are added with their own scripts.
pub fn add_utxo(ctx: &BuildContext<'_>, tx: &mut RawTransaction, utxo: &mut Utxo) -> Result<bool> {
    let previous_output = utxo.outpoint();
    if tx.find_input(&previous_output).is_some() {
        return Ok(false);
    }
    let sequence = *utxo.sequence.get_or_insert(ctx.network.default_sequence());

    let (script_sig, witness) = match (&utxo.script_sig, &utxo.witness) {
        (Some(script_sig), Some(witness)) => (script_sig.clone(), witness.clone()),
        _ => {
            populate_spend_data(ctx, utxo)?;
            SpendTemplate::for_utxo(utxo)?.placeholder(ctx.signer.supports_low_r())?
        }
    };
    tx.inputs.push(TxIn {
        previous_output,
        script_sig,
        sequence,
        witness,
    });
    Ok(true)
}

/// Replace the placeholder of input `index` with the user's signature
pub fn add_input_signature(
    tx: &mut RawTransaction,
    index: usize,
    utxo: &Utxo,
    user_der: &[u8],
) -> Result<()> {
    let (script_sig, witness) = SpendTemplate::for_utxo(utxo)?.user_signed(user_der)?;
    let input = tx
        .inputs
        .get_mut(index)
        .ok_or_else(|| Error::InvalidState(format!("no input {} to sign", index)))?;
    input.script_sig = script_sig;
    input.witness = witness;
    Ok(())
}

/// The script code signatures for `utxo` commit to
pub fn input_script_code(utxo: &Utxo) -> Result<Vec<u8>> {
    Ok(SpendTemplate::for_utxo(utxo)?.script_code())
}

/// Public keys a template's signatures verify against, in extraction order
pub fn template_public_keys(template: &SpendTemplate) -> Result<Vec<PublicKey>> {
    match template {
        SpendTemplate::External { public_key }
        | SpendTemplate::SingleSigLegacy { public_key }
        | SpendTemplate::SingleSigSegwitWrapped { public_key }
        | SpendTemplate::SingleSigSegwitNative { public_key } => {
            Ok(vec![crate::crypto::public_key(public_key)?])
        }
        SpendTemplate::MultisigLegacy { redeem_script }
        | SpendTemplate::MultisigSegwit { redeem_script }
        | SpendTemplate::MultisigCsv { redeem_script, .. } => {
            let keys = script::script_public_keys(redeem_script)?;
            let (service, user) = match template {
                // Optimized CSV scripts name the user key first
                SpendTemplate::MultisigCsv { user_first: false, .. } => (keys.get(1), keys.first()),
                _ => (keys.first(), keys.get(1)),
            };
            match (service, user) {
                (Some(service), Some(user)) => Ok(vec![public_key(service)?, public_key(user)?]),
                _ => Err(Error::Encoding("redeem script lacks two public keys".to_string())),
            }
        }
    }
}
