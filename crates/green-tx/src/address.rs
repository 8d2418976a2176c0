//! Address types and the output scripts they lock to

use crate::script;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wallet address type of an output or UTXO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressType {
    /// Single-sig pay-to-pubkey-hash
    #[serde(rename = "p2pkh")]
    P2pkh,
    /// Single-sig native segwit
    #[serde(rename = "p2wpkh")]
    P2wpkh,
    /// Single-sig segwit wrapped in P2SH
    #[serde(rename = "p2sh-p2wpkh")]
    P2shP2wpkh,
    /// 2of2 multisig in P2SH
    #[serde(rename = "p2sh")]
    P2sh,
    /// 2of2 multisig in P2SH-wrapped P2WSH
    #[serde(rename = "p2wsh")]
    P2wsh,
    /// 2of2 CSV recovery script in P2SH-wrapped P2WSH
    #[serde(rename = "csv")]
    Csv,
}

impl AddressType {
    /// Inputs of this type carry their signatures in the witness
    pub fn is_segwit(&self) -> bool {
        !matches!(self, AddressType::P2pkh | AddressType::P2sh)
    }

    /// Inputs of this type need a service co-signature
    pub fn is_multisig(&self) -> bool {
        matches!(self, AddressType::P2sh | AddressType::P2wsh | AddressType::Csv)
    }

    /// The scriptPubKey locking to `key_or_script`: a public key for
    /// single-sig types, the redeem script for multisig types
    pub fn script_pubkey(&self, key_or_script: &[u8]) -> Vec<u8> {
        match self {
            AddressType::P2pkh => script::p2pkh(key_or_script),
            AddressType::P2wpkh => script::p2wpkh(key_or_script),
            AddressType::P2shP2wpkh => script::p2sh(&script::p2wpkh(key_or_script)),
            AddressType::P2sh => script::p2sh(key_or_script),
            AddressType::P2wsh | AddressType::Csv => script::p2sh(&script::p2wsh(key_or_script)),
        }
    }

    /// Name used in wallet JSON
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressType::P2pkh => "p2pkh",
            AddressType::P2wpkh => "p2wpkh",
            AddressType::P2shP2wpkh => "p2sh-p2wpkh",
            AddressType::P2sh => "p2sh",
            AddressType::P2wsh => "p2wsh",
            AddressType::Csv => "csv",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segwit_and_multisig_flags() {
        assert!(!AddressType::P2pkh.is_segwit());
        assert!(!AddressType::P2sh.is_segwit());
        assert!(AddressType::Csv.is_segwit());
        assert!(AddressType::P2shP2wpkh.is_segwit());
        assert!(AddressType::Csv.is_multisig());
        assert!(!AddressType::P2wpkh.is_multisig());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&AddressType::P2shP2wpkh).unwrap();
        assert_eq!(json, "\"p2sh-p2wpkh\"");
        let parsed: AddressType = serde_json::from_str("\"csv\"").unwrap();
        assert_eq!(parsed, AddressType::Csv);
        assert_eq!(AddressType::P2wsh.to_string(), "p2wsh");
    }

    #[test]
    fn test_multisig_script_pubkeys_are_p2sh() {
        let redeem = script::multisig_2of2(&[0x02; 33], &[0x03; 33]).unwrap();
        for t in [AddressType::P2sh, AddressType::P2wsh, AddressType::Csv] {
            let spk = t.script_pubkey(&redeem);
            assert!(bitcoin::Script::from_bytes(&spk).is_p2sh());
        }
        assert_ne!(
            AddressType::P2sh.script_pubkey(&redeem),
            AddressType::P2wsh.script_pubkey(&redeem)
        );
    }
}
